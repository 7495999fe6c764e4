//! Filesystem helpers shared by the client side

pub mod socket;
