pub mod money;
pub mod qr;
