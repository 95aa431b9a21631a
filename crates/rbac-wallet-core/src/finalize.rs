//! Recovery-id candidate search
//!
//! An ECDSA threshold signature carries only `(r, s)`. Finalizers try each
//! candidate recovery id in order, rebuild the signed transaction, run the
//! chain's own signer recovery on it and keep the first candidate whose
//! recovered address matches the wallet. A candidate that reconstructs
//! cleanly but recovers a different address is rejected like any other.

use crate::types::SessionId;
use crate::{Error, Result};
use tracing::{debug, warn};

/// Recovery ids tried for secp256k1, in order
pub const SECP256K1_RECOVERY_CANDIDATES: [u8; 2] = [0, 1];

/// Candidate accepted by [`search_recovery_candidates`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedCandidate<T> {
    pub recovery_id: u8,
    /// Address recovered from the reconstruction
    pub signer: String,
    pub value: T,
}

/// Try each candidate in turn and return the first whose recovered address
/// equals `expected_address`, compared case-insensitively.
///
/// `reconstruct` returns the rebuilt value together with the address
/// recovered from it. Reconstruction errors are recorded and the next
/// candidate is tried; if none matches the result is
/// [`Error::SignatureReconstruction`], which callers must not retry.
pub fn search_recovery_candidates<T, F>(
    candidates: &[u8],
    expected_address: &str,
    session_id: &SessionId,
    mut reconstruct: F,
) -> Result<AcceptedCandidate<T>>
where
    F: FnMut(u8) -> Result<(T, String)>,
{
    let mut attempts = Vec::with_capacity(candidates.len());

    for &recovery_id in candidates {
        match reconstruct(recovery_id) {
            Ok((value, signer)) if signer.eq_ignore_ascii_case(expected_address) => {
                debug!(recovery_id, %signer, "recovery candidate matched");
                return Ok(AcceptedCandidate {
                    recovery_id,
                    signer,
                    value,
                });
            }
            Ok((_, signer)) => {
                attempts.push(format!("id {} recovered {}", recovery_id, signer));
            }
            Err(e) => {
                attempts.push(format!("id {} failed: {}", recovery_id, e));
            }
        }
    }

    warn!(%session_id, expected = expected_address, "no recovery candidate matched");
    Err(Error::SignatureReconstruction {
        session_id: session_id.to_string(),
        details: format!("expected {}; {}", expected_address, attempts.join("; ")),
    })
}
