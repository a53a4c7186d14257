/// Inbound message sources
pub mod telegram;
