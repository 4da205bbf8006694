pub mod api_errors;
pub mod checkout;
pub mod stripe_client;
pub mod stripe_signature;
pub mod stripe_webhook;
