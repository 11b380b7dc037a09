//! SIM swap: prove ownership of a number, pay the fee, verify identity, then
//! take the replacement as an eSIM or collect a physical SIM at a shop.
//!
//! The OTP step is skipped when the customer cannot receive one; identity
//! verification then stands in as proof of ownership.

use core::fmt;

use sim_portal_core::{
    DocumentType, FlowKind, Msisdn, PaymentSelection, RequestId, SIM_SWAP_FEE, Shop, ShopId,
};
use tracing::{info, instrument};

use super::{FlowContext, FlowError, FlowServices, Navigation, VerificationView};
use crate::api::{Mutation, SimType};
use crate::notify::Notice;
use crate::payment::{self, PaymentReceipt};
use crate::provider::Metadata;

const OTP_LENGTH: usize = 4;
const OTP_CHANNEL: &str = "sms";

/// Steps of a SIM swap, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimSwapStep {
    Number,
    Otp,
    Payment,
    Kyc,
    Type,
    Esim,
    Shop,
}

impl SimSwapStep {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Otp => "otp",
            Self::Payment => "payment",
            Self::Kyc => "kyc",
            Self::Type => "type",
            Self::Esim => "esim",
            Self::Shop => "shop",
        }
    }
}

impl fmt::Display for SimSwapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Orchestrates one SIM swap.
pub struct SimSwapFlow {
    ctx: FlowContext,
    step: SimSwapStep,
    msisdn: Option<Msisdn>,
    uses_otp: bool,
    receipt: Option<PaymentReceipt>,
    sim_type: Option<SimType>,
    shop: Option<&'static Shop>,
    confirmed: bool,
}

impl fmt::Debug for SimSwapFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimSwapFlow")
            .field("request_id", &self.ctx.request_id())
            .field("step", &self.step)
            .field("msisdn", &self.msisdn)
            .field("uses_otp", &self.uses_otp)
            .field("confirmed", &self.confirmed)
            .finish_non_exhaustive()
    }
}

impl SimSwapFlow {
    #[must_use]
    pub fn new(services: FlowServices) -> Self {
        Self::with_context(FlowContext::new(FlowKind::SimSwap, services), SimSwapStep::Number)
    }

    /// Continue an existing request at `step`.
    #[must_use]
    pub fn resume(services: FlowServices, request_id: RequestId, step: SimSwapStep) -> Self {
        Self::with_context(
            FlowContext::with_request(FlowKind::SimSwap, services, request_id),
            step,
        )
    }

    fn with_context(ctx: FlowContext, step: SimSwapStep) -> Self {
        Self {
            ctx,
            step,
            msisdn: None,
            uses_otp: false,
            receipt: None,
            sim_type: None,
            shop: None,
            confirmed: false,
        }
    }

    #[must_use]
    pub const fn step(&self) -> SimSwapStep {
        self.step
    }

    #[must_use]
    pub fn request_id(&self) -> Option<&RequestId> {
        self.ctx.request_id()
    }

    #[must_use]
    pub const fn msisdn(&self) -> Option<&Msisdn> {
        self.msisdn.as_ref()
    }

    /// Whether ownership is proven by OTP rather than by verification alone.
    #[must_use]
    pub const fn uses_otp(&self) -> bool {
        self.uses_otp
    }

    #[must_use]
    pub const fn receipt(&self) -> Option<&PaymentReceipt> {
        self.receipt.as_ref()
    }

    #[must_use]
    pub const fn sim_type(&self) -> Option<SimType> {
        self.sim_type
    }

    #[must_use]
    pub const fn shop(&self) -> Option<&'static Shop> {
        self.shop
    }

    /// Whether the swap has been confirmed by the backend.
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    fn expect_step(&self, step: SimSwapStep) -> Result<(), FlowError> {
        if self.step == step {
            Ok(())
        } else {
            Err(FlowError::InvalidStep(self.step.name()))
        }
    }

    /// Submit the number being swapped, starting the request on first use.
    ///
    /// Sends an OTP when the customer can receive one.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed number or a backend failure; the
    /// flow stays on the number step.
    #[instrument(skip(self))]
    pub async fn submit_number(&mut self, number: &str, can_receive_otp: bool) -> Result<(), FlowError> {
        self.expect_step(SimSwapStep::Number)?;
        let msisdn = Msisdn::parse(number).map_err(|e| {
            self.ctx.notify(Notice::error(e.to_string()));
            FlowError::from(e)
        })?;
        self.ctx
            .ensure_started("Failed to start SIM swap. Please try again.")
            .await?;
        self.ctx
            .mutate(
                Mutation::SelectNumber {
                    msisdn: msisdn.clone(),
                },
                "Failed to submit number",
            )
            .await?;
        if can_receive_otp {
            self.ctx
                .mutate(
                    Mutation::SendOtp {
                        channel: OTP_CHANNEL.to_owned(),
                    },
                    "Failed to send OTP",
                )
                .await?;
            info!(msisdn = %msisdn, "OTP sent");
        }
        self.msisdn = Some(msisdn);
        self.uses_otp = can_receive_otp;
        self.step = if can_receive_otp {
            SimSwapStep::Otp
        } else {
            SimSwapStep::Payment
        };
        Ok(())
    }

    /// Check the OTP the customer received.
    ///
    /// # Errors
    ///
    /// [`FlowError::Validation`] unless `otp` is exactly four digits, or
    /// the backend error when the code is wrong.
    #[instrument(skip(self, otp))]
    pub async fn verify_otp(&mut self, otp: &str) -> Result<(), FlowError> {
        self.expect_step(SimSwapStep::Otp)?;
        let otp = otp.trim();
        if otp.len() != OTP_LENGTH || !otp.chars().all(|c| c.is_ascii_digit()) {
            let message = "Please enter the 4-digit OTP";
            self.ctx.notify(Notice::error(message));
            return Err(FlowError::Validation(message.to_owned()));
        }
        self.ctx
            .mutate(
                Mutation::VerifyOtp {
                    otp: otp.to_owned(),
                },
                "Invalid OTP. Please try again.",
            )
            .await?;
        self.ctx
            .notify(Notice::success("Phone number verified successfully!"));
        self.step = SimSwapStep::Payment;
        Ok(())
    }

    /// Send a fresh OTP.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub async fn resend_otp(&mut self) -> Result<(), FlowError> {
        self.expect_step(SimSwapStep::Otp)?;
        self.ctx
            .mutate(
                Mutation::SendOtp {
                    channel: OTP_CHANNEL.to_owned(),
                },
                "Failed to resend OTP",
            )
            .await?;
        self.ctx
            .notify(Notice::info("A new OTP has been sent to your phone"));
        Ok(())
    }

    /// Pay the swap fee.
    ///
    /// # Errors
    ///
    /// Returns the validation or backend error; the flow stays on the
    /// payment step.
    #[instrument(skip(self, selection))]
    pub async fn pay(&mut self, selection: &PaymentSelection) -> Result<PaymentReceipt, FlowError> {
        self.expect_step(SimSwapStep::Payment)?;
        let receipt =
            payment::submit(&self.ctx, selection, SIM_SWAP_FEE, self.msisdn.clone()).await?;
        self.receipt = Some(receipt);
        self.step = SimSwapStep::Kyc;
        Ok(receipt)
    }

    /// Open the provider for `document_type` and reconcile the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot load, the backend refuses
    /// the start, or an attempt is already running.
    pub async fn start_verification(
        &mut self,
        document_type: DocumentType,
    ) -> Result<VerificationView, FlowError> {
        self.expect_step(SimSwapStep::Kyc)?;
        let mut extra = Metadata::new();
        if let Some(msisdn) = &self.msisdn {
            extra.insert("msisdn".to_owned(), msisdn.to_string());
        }
        extra.insert("otpVerified".to_owned(), self.uses_otp.to_string());
        let view = self.ctx.start_verification(document_type, extra).await?;
        Ok(self.apply(view))
    }

    /// # Errors
    ///
    /// Returns an error outside the KYC step.
    pub async fn refresh_verification(&mut self) -> Result<VerificationView, FlowError> {
        self.expect_step(SimSwapStep::Kyc)?;
        let view = self.ctx.refresh_verification().await?;
        Ok(self.apply(view))
    }

    /// # Errors
    ///
    /// Returns an error outside the KYC step.
    pub async fn await_verification(&mut self) -> Result<VerificationView, FlowError> {
        self.expect_step(SimSwapStep::Kyc)?;
        let view = self.ctx.await_verification().await?;
        Ok(self.apply(view))
    }

    /// # Errors
    ///
    /// Returns an error outside the KYC step or while an attempt runs.
    pub async fn resume_verification(&mut self) -> Result<VerificationView, FlowError> {
        self.expect_step(SimSwapStep::Kyc)?;
        let view = self.ctx.resume_verification().await?;
        Ok(self.apply(view))
    }

    pub fn retry_verification(&mut self) {
        self.ctx.retry_verification();
    }

    #[must_use]
    pub fn verification(&self) -> VerificationView {
        self.ctx.verification_view()
    }

    fn apply(&mut self, view: VerificationView) -> VerificationView {
        if matches!(view, VerificationView::Verified(_)) {
            self.step = SimSwapStep::Type;
        }
        view
    }

    /// Choose how the replacement SIM is delivered.
    ///
    /// # Errors
    ///
    /// Returns the backend error; the flow stays on the type step.
    pub async fn select_sim_type(&mut self, sim_type: SimType) -> Result<(), FlowError> {
        self.expect_step(SimSwapStep::Type)?;
        self.ctx
            .mutate(Mutation::SimType { sim_type }, "Failed to set SIM type")
            .await?;
        self.sim_type = Some(sim_type);
        self.step = match sim_type {
            SimType::Esim => SimSwapStep::Esim,
            SimType::Physical => SimSwapStep::Shop,
        };
        Ok(())
    }

    /// Issue the replacement eSIM.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    #[instrument(skip(self))]
    pub async fn finalize_esim(&mut self) -> Result<(), FlowError> {
        self.expect_step(SimSwapStep::Esim)?;
        if self.confirmed {
            return Ok(());
        }
        self.ctx
            .mutate(Mutation::FinalizeEsim, "Failed to finalize eSIM")
            .await?;
        self.confirm();
        Ok(())
    }

    /// Choose the shop where the physical SIM will be collected.
    ///
    /// # Errors
    ///
    /// [`FlowError::Validation`] for a shop outside the list, or the
    /// backend error.
    #[instrument(skip(self))]
    pub async fn select_shop(&mut self, shop_id: ShopId) -> Result<&'static Shop, FlowError> {
        self.expect_step(SimSwapStep::Shop)?;
        let Some(shop) = Shop::find(shop_id) else {
            let message = "Please select a shop";
            self.ctx.notify(Notice::error(message));
            return Err(FlowError::Validation(message.to_owned()));
        };
        self.ctx
            .mutate(
                Mutation::SelectShop { shop_id },
                "Failed to confirm shop selection",
            )
            .await?;
        self.shop = Some(shop);
        self.confirm();
        Ok(shop)
    }

    fn confirm(&mut self) {
        self.confirmed = true;
        info!(request_id = ?self.ctx.request_id(), sim_type = ?self.sim_type, "SIM swap confirmed");
        self.ctx.notify(Notice::success("SIM swap request confirmed!"));
    }

    /// Go back one step without touching the backend.
    ///
    /// Payment returns to the OTP step only when an OTP was used. Delivery
    /// steps return to the type choice until the swap is confirmed.
    pub fn back(&mut self) -> Navigation<SimSwapStep> {
        let target = match self.step {
            SimSwapStep::Number => Navigation::Exit,
            SimSwapStep::Otp => Navigation::Step(SimSwapStep::Number),
            SimSwapStep::Payment if self.uses_otp => Navigation::Step(SimSwapStep::Otp),
            SimSwapStep::Payment => Navigation::Step(SimSwapStep::Number),
            SimSwapStep::Kyc => Navigation::Step(SimSwapStep::Payment),
            SimSwapStep::Type => Navigation::Step(SimSwapStep::Kyc),
            step @ (SimSwapStep::Esim | SimSwapStep::Shop) if self.confirmed => {
                Navigation::Stay(step)
            }
            SimSwapStep::Esim | SimSwapStep::Shop => Navigation::Step(SimSwapStep::Type),
        };
        if let Navigation::Step(step) = target {
            if self.step == SimSwapStep::Kyc {
                self.ctx.retry_verification();
            }
            self.step = step;
        }
        target
    }

    /// Leave the flow, stopping verification timers and provider UI.
    pub fn close(mut self) {
        info!(request_id = ?self.ctx.request_id(), step = %self.step, "SIM swap flow closed");
        self.ctx.shutdown();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::*;
    use crate::flows::test_support::fixture;
    use crate::notify::NoticeLevel;

    fn at_step(services: FlowServices, step: SimSwapStep) -> SimSwapFlow {
        SimSwapFlow::resume(services, RequestId::new("req-1").unwrap(), step)
    }

    #[tokio::test]
    async fn test_number_with_otp() {
        let fx = fixture();
        let mut flow = SimSwapFlow::new(fx.services.clone());

        flow.submit_number("7123 4567", true).await.unwrap();

        assert_eq!(flow.step(), SimSwapStep::Otp);
        assert_eq!(flow.msisdn().unwrap().as_str(), "71234567");
        assert_eq!(
            fx.session.calls(),
            ["simswap/start", "simswap/req-1/number", "simswap/req-1/otp/send"]
        );
        assert_eq!(
            fx.session.mutations()[1],
            Mutation::SendOtp {
                channel: "sms".into()
            }
        );
    }

    #[tokio::test]
    async fn test_number_without_otp_skips_to_payment() {
        let fx = fixture();
        let mut flow = SimSwapFlow::new(fx.services.clone());

        flow.submit_number("71234567", false).await.unwrap();

        assert_eq!(flow.step(), SimSwapStep::Payment);
        assert!(!flow.uses_otp());
        assert_eq!(fx.session.calls(), ["simswap/start", "simswap/req-1/number"]);
        assert_eq!(flow.back(), Navigation::Step(SimSwapStep::Number));
    }

    #[tokio::test]
    async fn test_request_is_started_once() {
        let fx = fixture();
        fx.session.fail_step("number");
        let mut flow = SimSwapFlow::new(fx.services.clone());

        assert!(flow.submit_number("71234567", true).await.is_err());
        fx.session.heal_step("number");
        flow.submit_number("71234567", true).await.unwrap();

        let starts = fx
            .session
            .calls()
            .iter()
            .filter(|c| c.ends_with("/start"))
            .count();
        assert_eq!(starts, 1);
    }

    #[tokio::test]
    async fn test_start_failure_message() {
        let fx = fixture();
        *fx.session.request_id.lock().unwrap() = None;
        let mut flow = SimSwapFlow::new(fx.services.clone());

        assert!(flow.submit_number("71234567", true).await.is_err());

        assert_eq!(flow.step(), SimSwapStep::Number);
        assert_eq!(
            fx.notifier.messages(NoticeLevel::Error),
            ["Failed to start SIM swap. Please try again."]
        );
    }

    #[tokio::test]
    async fn test_otp_must_be_four_digits() {
        let fx = fixture();
        let mut flow = at_step(fx.services.clone(), SimSwapStep::Otp);

        for otp in ["123", "12345", "12a4", ""] {
            let err = flow.verify_otp(otp).await.unwrap_err();
            assert!(matches!(err, FlowError::Validation(_)));
        }
        assert!(fx.session.calls().is_empty());

        flow.verify_otp("1234").await.unwrap();
        assert_eq!(flow.step(), SimSwapStep::Payment);
        assert_eq!(
            fx.notifier.messages(NoticeLevel::Success),
            ["Phone number verified successfully!"]
        );
    }

    #[tokio::test]
    async fn test_wrong_otp_stays() {
        let fx = fixture();
        fx.session.fail_step("otp/verify");
        let mut flow = at_step(fx.services.clone(), SimSwapStep::Otp);

        assert!(flow.verify_otp("9999").await.is_err());

        assert_eq!(flow.step(), SimSwapStep::Otp);
        assert_eq!(
            fx.notifier.messages(NoticeLevel::Error),
            ["Invalid OTP. Please try again."]
        );
    }

    #[tokio::test]
    async fn test_resend_otp() {
        let fx = fixture();
        let mut flow = at_step(fx.services.clone(), SimSwapStep::Otp);

        flow.resend_otp().await.unwrap();
        assert_eq!(
            fx.notifier.messages(NoticeLevel::Info),
            ["A new OTP has been sent to your phone"]
        );

        fx.session.fail_step("otp/send");
        assert!(flow.resend_otp().await.is_err());
        assert_eq!(fx.notifier.messages(NoticeLevel::Error), ["Failed to resend OTP"]);
        assert_eq!(flow.step(), SimSwapStep::Otp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_payment_charges_swap_fee_with_number() {
        let fx = fixture();
        let mut flow = SimSwapFlow::new(fx.services.clone());
        flow.submit_number("71234567", false).await.unwrap();

        let receipt = flow.pay(&PaymentSelection::card(None)).await.unwrap();

        assert_eq!(receipt.amount.amount, Decimal::new(10, 0));
        assert_eq!(flow.step(), SimSwapStep::Kyc);
        let ledger = fx.session.ledger.lock().unwrap().clone();
        assert_eq!(ledger[0].msisdn.as_ref().unwrap().as_str(), "71234567");
    }

    #[tokio::test(start_paused = true)]
    async fn test_verified_moves_to_type_choice() {
        let fx = fixture();
        fx.session.push_status(Some(json!({ "kyc_status": "verified" })));
        let mut flow = at_step(fx.services.clone(), SimSwapStep::Kyc);

        let view = flow.start_verification(DocumentType::Omang).await.unwrap();

        assert!(matches!(view, VerificationView::Verified(_)));
        assert_eq!(flow.step(), SimSwapStep::Type);
        let starts = fx.provider.starts.lock().unwrap().clone();
        assert_eq!(starts[0].1["flow"], "sim_swap");
        assert_eq!(starts[0].1["otpVerified"], "false");
    }

    #[tokio::test]
    async fn test_esim_delivery() {
        let fx = fixture();
        let mut flow = at_step(fx.services.clone(), SimSwapStep::Type);

        flow.select_sim_type(SimType::Esim).await.unwrap();
        assert_eq!(flow.step(), SimSwapStep::Esim);
        assert_eq!(flow.back(), Navigation::Step(SimSwapStep::Type));

        flow.select_sim_type(SimType::Esim).await.unwrap();
        flow.finalize_esim().await.unwrap();
        assert!(flow.is_confirmed());
        assert_eq!(flow.back(), Navigation::Stay(SimSwapStep::Esim));
        assert_eq!(
            fx.notifier.messages(NoticeLevel::Success),
            ["SIM swap request confirmed!"]
        );
    }

    #[tokio::test]
    async fn test_shop_collection() {
        let fx = fixture();
        let mut flow = at_step(fx.services.clone(), SimSwapStep::Type);
        flow.select_sim_type(SimType::Physical).await.unwrap();
        assert_eq!(flow.step(), SimSwapStep::Shop);

        let err = flow.select_shop(ShopId::new(99)).await.unwrap_err();
        assert!(matches!(err, FlowError::Validation(_)));

        let shop = flow.select_shop(ShopId::new(2)).await.unwrap();
        assert_eq!(shop.name, "BTC Game City");
        assert_eq!(flow.sim_type(), Some(SimType::Physical));
        assert_eq!(flow.back(), Navigation::Stay(SimSwapStep::Shop));
    }

    #[tokio::test]
    async fn test_shop_failure_stays_unconfirmed() {
        let fx = fixture();
        fx.session.fail_step("shop/select");
        let mut flow = at_step(fx.services.clone(), SimSwapStep::Shop);

        assert!(flow.select_shop(ShopId::new(1)).await.is_err());

        assert!(!flow.is_confirmed());
        assert!(flow.shop().is_none());
        assert_eq!(
            fx.notifier.messages(NoticeLevel::Error),
            ["Failed to confirm shop selection"]
        );
    }

    #[tokio::test]
    async fn test_back_from_payment_after_otp() {
        let fx = fixture();
        let mut flow = SimSwapFlow::new(fx.services.clone());
        flow.submit_number("71234567", true).await.unwrap();
        flow.verify_otp("1234").await.unwrap();

        assert_eq!(flow.back(), Navigation::Step(SimSwapStep::Otp));
        assert_eq!(flow.back(), Navigation::Step(SimSwapStep::Number));
        assert_eq!(flow.back(), Navigation::Exit);
    }
}
