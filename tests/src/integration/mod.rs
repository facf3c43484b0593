//! Integration tests across hk-01..hk-05 and the node runtime.

#[cfg(test)]
pub mod support;

#[cfg(test)]
mod kernel;
#[cfg(test)]
mod leadership;
#[cfg(test)]
mod routing;
#[cfg(test)]
mod single_writer;
#[cfg(test)]
mod store_integrity;
#[cfg(test)]
mod volumes;
