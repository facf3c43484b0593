//! Network adapters.

mod tcp;

pub use tcp::TcpDialer;

#[cfg(test)]
pub(crate) use tcp::test_support;
