//! Jointly agree on a random string nobody can bias alone.
//!
//! Round one: every party commits to `SHA-256(domain || role || salt || value)`.
//! Round two: every party opens `salt || value`. After all openings verify,
//! the output is the XOR of every party's value.

use async_trait::async_trait;
use mpc_types::RoleId;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::channel::JobChannel;
use crate::error::{JobError, JobResult};
use crate::job::{Job2P, JobMP};
use crate::protocol::Protocol;

const DOMAIN: &[u8] = b"mpc-agree-random-v1";
const SALT_LEN: usize = 32;
const COMMITMENT_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum AgreeRandomError {
    #[error("commitment from role {role} has {len} bytes, expected 32")]
    MalformedCommitment { role: RoleId, len: usize },

    #[error("opening from role {role} has {len} bytes, expected {expected}")]
    MalformedOpening {
        role: RoleId,
        len: usize,
        expected: usize,
    },

    #[error("opening from role {0} does not match its commitment")]
    CommitmentMismatch(RoleId),
}

/// Commit-then-reveal random agreement producing `bits / 8` bytes.
#[derive(Debug, Clone, Copy)]
pub struct AgreeRandom {
    bits: usize,
}

impl AgreeRandom {
    /// `bits` must be at least 8 and a multiple of 8.
    pub fn new(bits: usize) -> JobResult<Self> {
        if bits < 8 || bits % 8 != 0 {
            return Err(JobError::InvalidBits(bits));
        }
        Ok(Self { bits })
    }

    pub fn output_len(&self) -> usize {
        self.bits / 8
    }
}

#[async_trait]
impl Protocol for AgreeRandom {
    type Output = Vec<u8>;

    fn name(&self) -> &'static str {
        "agree-random"
    }

    async fn execute(&self, channel: &JobChannel) -> JobResult<Vec<u8>> {
        let me = channel.self_role();
        let peers = channel.peers();
        let len = self.output_len();

        let mut salt = [0u8; SALT_LEN];
        let mut value = vec![0u8; len];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut value);

        let own_commitment = commit(me, &salt, &value);
        for &peer in &peers {
            channel.send(peer, own_commitment.to_vec()).await?;
        }
        let commitments = channel.receive_all(&peers).await?;
        debug!(job_id = %channel.job_id(), peers = peers.len(), "Commitments received");

        let mut opening = Vec::with_capacity(SALT_LEN + len);
        opening.extend_from_slice(&salt);
        opening.extend_from_slice(&value);
        for &peer in &peers {
            channel.send(peer, opening.clone()).await?;
        }
        let openings = channel.receive_all(&peers).await?;

        let mut output = value;
        for &peer in &peers {
            let contribution = verify_opening(peer, len, &commitments, &openings)
                .map_err(JobError::protocol)?;
            for (out, byte) in output.iter_mut().zip(contribution) {
                *out ^= byte;
            }
        }
        Ok(output)
    }
}

fn commit(role: RoleId, salt: &[u8], value: &[u8]) -> [u8; COMMITMENT_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN);
    hasher.update(role.0.to_be_bytes());
    hasher.update(salt);
    hasher.update(value);
    hasher.finalize().into()
}

/// Returns the peer's contribution once its opening matches its commitment.
fn verify_opening<'a>(
    role: RoleId,
    len: usize,
    commitments: &HashMap<RoleId, Vec<u8>>,
    openings: &'a HashMap<RoleId, Vec<u8>>,
) -> Result<&'a [u8], AgreeRandomError> {
    let commitment = commitments.get(&role).map(Vec::as_slice).unwrap_or_default();
    if commitment.len() != COMMITMENT_LEN {
        return Err(AgreeRandomError::MalformedCommitment {
            role,
            len: commitment.len(),
        });
    }

    let opening = openings.get(&role).map(Vec::as_slice).unwrap_or_default();
    if opening.len() != SALT_LEN + len {
        return Err(AgreeRandomError::MalformedOpening {
            role,
            len: opening.len(),
            expected: SALT_LEN + len,
        });
    }

    let (salt, value) = opening.split_at(SALT_LEN);
    if commit(role, salt, value)[..] != commitment[..] {
        return Err(AgreeRandomError::CommitmentMismatch(role));
    }
    Ok(value)
}

/// Two-party random agreement over `job`.
pub async fn agree_random(job: &Job2P, bits: usize) -> JobResult<Vec<u8>> {
    job.run(&AgreeRandom::new(bits)?).await
}

/// n-party random agreement over `job`.
pub async fn multi_agree_random(job: &JobMP, bits: usize) -> JobResult<Vec<u8>> {
    job.run(&AgreeRandom::new(bits)?).await
}
