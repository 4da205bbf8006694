pub mod checkout;
pub mod error;
pub mod event;
pub mod fulfillment;
pub mod id;
pub mod ledger;
pub mod money;
pub mod order;
