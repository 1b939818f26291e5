//! Sequential fallback across candidate addresses.
//!
//! A host may be reachable over several interfaces, only some of which the
//! peer can route to. [`race_addresses`] tries each address in order and stops
//! at the first attempt that is accepted. Attempts are never issued
//! concurrently: two accepted requests would start two operations on the
//! destination host.
//!
//! When every attempt fails, the error of the *last* attempt is returned.

use std::future::Future;
use tracing::debug;

/// An attempt that was accepted, together with the address that worked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted<T> {
    pub address: String,
    pub value: T,
}

/// Why no attempt was accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RaceError<E> {
    /// There was nothing to try
    #[error("No candidate addresses")]
    NoAddresses,

    /// Every attempt failed; carries the last error
    #[error("All {attempts} addresses failed, last error: {last_error}")]
    Exhausted { attempts: usize, last_error: E },
}

/// Try `attempt` against each address in order until one succeeds.
pub async fn race_addresses<T, E, F, Fut>(
    addresses: &[String],
    mut attempt: F,
) -> Result<Accepted<T>, RaceError<E>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last_error = None;

    for address in addresses {
        debug!("Trying address {}", address);
        match attempt(address.clone()).await {
            Ok(value) => {
                debug!("Address {} accepted", address);
                return Ok(Accepted {
                    address: address.clone(),
                    value,
                });
            }
            Err(error) => {
                debug!("Address {} failed: {}", address, error);
                last_error = Some(error);
            }
        }
    }

    match last_error {
        Some(last_error) => Err(RaceError::Exhausted {
            attempts: addresses.len(),
            last_error,
        }),
        None => Err(RaceError::NoAddresses),
    }
}
