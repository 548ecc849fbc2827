//! The trap observers embodying monitoring policy

pub mod bfd;
pub mod bgp;
pub mod ignored;
pub mod link;
pub mod logged;
