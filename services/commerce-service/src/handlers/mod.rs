pub mod payment_handler;
pub mod payout_handler;
pub mod wallet_handler;
