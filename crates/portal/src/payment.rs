//! Payment sub-flow shared by eSIM purchase and SIM swap.
//!
//! The request mutation is the authoritative record of payment. The ledger
//! entry is for audit and reporting only, so a failed ledger write is logged
//! and the customer proceeds.

use sim_portal_core::{Msisdn, PaymentMethod, PaymentSelection, Price};
use tracing::{info, warn};

use crate::api::{LedgerEntry, Mutation};
use crate::flows::{FlowContext, FlowError};
use crate::notify::Notice;

/// Result of a completed payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub method: PaymentMethod,
    pub amount: Price,
    /// Whether the ledger accepted the entry.
    pub ledger_recorded: bool,
}

/// Validate `selection`, simulate processing, then record the payment on the
/// request and in the ledger.
pub(crate) async fn submit(
    ctx: &FlowContext,
    selection: &PaymentSelection,
    amount: Price,
    msisdn: Option<Msisdn>,
) -> Result<PaymentReceipt, FlowError> {
    let method = selection.validate().map_err(|e| {
        ctx.notify(Notice::error(e.to_string()));
        FlowError::from(e)
    })?;
    let request_id = ctx.require_request()?;

    info!(
        flow = %ctx.kind(),
        request_id = %request_id,
        method = %method,
        amount = %amount,
        "Processing payment"
    );
    tokio::time::sleep(ctx.payment_delay()).await;

    ctx.mutate(
        Mutation::Payment {
            amount: amount.amount,
        },
        "Payment failed. Please try again.",
    )
    .await?;

    let entry = LedgerEntry::completed(amount, msisdn);
    let ledger_recorded = match ctx.session().record_ledger(&entry).await {
        Ok(()) => true,
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Failed to record payment in ledger");
            false
        }
    };

    ctx.notify(Notice::success("Payment successful!"));
    Ok(PaymentReceipt {
        method,
        amount,
        ledger_recorded,
    })
}
