pub mod dispatcher;
pub mod fulfillment;
pub mod worker;
