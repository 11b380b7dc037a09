//! Fixed product catalogs: bundle plans and SIM collection shops.

use super::id::ShopId;
use super::price::Price;

/// A purchasable bundle plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub id: &'static str,
    pub name: &'static str,
    pub price: Price,
    pub data: Option<&'static str>,
    pub minutes: Option<&'static str>,
    pub sms: Option<&'static str>,
    /// Highlighted as the recommended choice.
    pub popular: bool,
}

/// Fee charged for a SIM swap, whatever the replacement SIM type.
pub const SIM_SWAP_FEE: Price = Price::pula(10);

/// Activation fee added to every bundle plan. The bare eSIM plan has none.
const ACTIVATION_FEE: Price = Price::pula(10);

/// Plans offered during eSIM purchase.
pub const PLANS: &[Plan] = &[
    Plan {
        id: "esim",
        name: "eSIM Only",
        price: Price::pula(10),
        data: None,
        minutes: None,
        sms: None,
        popular: false,
    },
    Plan {
        id: "starter",
        name: "Starter Pack",
        price: Price::pula(50),
        data: Some("1GB"),
        minutes: Some("50"),
        sms: Some("50"),
        popular: false,
    },
    Plan {
        id: "value",
        name: "Value Pack",
        price: Price::pula(100),
        data: Some("3GB"),
        minutes: Some("150"),
        sms: Some("100"),
        popular: true,
    },
    Plan {
        id: "premium",
        name: "Premium Pack",
        price: Price::pula(200),
        data: Some("8GB"),
        minutes: Some("Unlimited"),
        sms: Some("Unlimited"),
        popular: false,
    },
];

impl Plan {
    /// Look up a plan by id.
    #[must_use]
    pub fn find(id: &str) -> Option<&'static Self> {
        PLANS.iter().find(|plan| plan.id == id)
    }

    /// Whether the plan carries a bundle on top of the eSIM itself.
    #[must_use]
    pub const fn has_bundle(&self) -> bool {
        self.data.is_some()
    }

    /// Activation fee for this plan.
    #[must_use]
    pub const fn activation_fee(&self) -> Price {
        if self.has_bundle() {
            ACTIVATION_FEE
        } else {
            Price::zero(ACTIVATION_FEE.currency_code)
        }
    }

    /// Amount charged: plan price plus activation fee.
    #[must_use]
    pub fn total(&self) -> Price {
        self.price + self.activation_fee()
    }
}

/// A branch where a physical replacement SIM can be collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shop {
    pub id: ShopId,
    pub name: &'static str,
    pub address: &'static str,
    pub hours: &'static str,
}

/// Collection points for physical SIM swaps.
pub const SHOPS: &[Shop] = &[
    Shop {
        id: ShopId::new(1),
        name: "BTC Main Mall",
        address: "Main Mall, Gaborone",
        hours: "Mon-Sat: 8:00 AM - 6:00 PM",
    },
    Shop {
        id: ShopId::new(2),
        name: "BTC Game City",
        address: "Game City Mall, Gaborone",
        hours: "Mon-Sun: 9:00 AM - 8:00 PM",
    },
    Shop {
        id: ShopId::new(3),
        name: "BTC Francistown",
        address: "Nzano Centre, Francistown",
        hours: "Mon-Sat: 8:00 AM - 5:00 PM",
    },
    Shop {
        id: ShopId::new(4),
        name: "BTC Maun",
        address: "Ngami Centre, Maun",
        hours: "Mon-Fri: 8:00 AM - 5:00 PM",
    },
    Shop {
        id: ShopId::new(5),
        name: "BTC Kasane",
        address: "President Avenue, Kasane",
        hours: "Mon-Fri: 8:00 AM - 4:30 PM",
    },
];

impl Shop {
    /// Look up a shop by id.
    #[must_use]
    pub fn find(id: ShopId) -> Option<&'static Self> {
        SHOPS.iter().find(|shop| shop.id == id)
    }
}
