//! Two-party and multi-party jobs: a transport bound to a protocol run.

use mpc_network::Transport;
use mpc_types::{validate_party_names, Role, RoleId, TopologyError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::CallbackBridge;
use crate::channel::JobChannel;
use crate::error::{JobError, JobResult};
use crate::protocol::Protocol;
use crate::registry::Handle;

/// State shared by both job flavours.
struct JobCore {
    id: Uuid,
    self_role: RoleId,
    names: Vec<String>,
    transport: Arc<dyn Transport>,
    channel: Arc<JobChannel>,
    attachment: Mutex<Option<(Arc<CallbackBridge>, Handle)>>,
}

impl JobCore {
    fn new(
        transport: Arc<dyn Transport>,
        self_role: RoleId,
        names: Vec<String>,
        parent: Option<&CancellationToken>,
    ) -> JobResult<Self> {
        let count = names.len();
        if count < 2 {
            return Err(TopologyError::TooFewParties(count).into());
        }
        if self_role.index() >= count {
            return Err(TopologyError::SelfOutOfRange {
                role: self_role,
                count,
            }
            .into());
        }
        validate_party_names(&names)?;

        if transport.self_role() != self_role {
            return Err(JobError::RoleMismatch {
                transport: transport.self_role(),
                job: self_role,
            });
        }
        if transport.party_count() != count {
            return Err(JobError::PartyCountMismatch {
                transport: transport.party_count(),
                names: count,
            });
        }

        let id = Uuid::new_v4();
        let scope = parent.map(CancellationToken::child_token).unwrap_or_default();
        let channel = Arc::new(JobChannel::new(id, Arc::clone(&transport), scope));
        info!(job_id = %id, role = %self_role, parties = count, "Job created");

        Ok(Self {
            id,
            self_role,
            names,
            transport,
            channel,
            attachment: Mutex::new(None),
        })
    }

    fn channel(&self) -> JobResult<Arc<JobChannel>> {
        if self.channel.is_closed() {
            return Err(JobError::Closed);
        }
        Ok(Arc::clone(&self.channel))
    }

    fn attach(&self, bridge: &Arc<CallbackBridge>) -> JobResult<Handle> {
        let mut attachment = self.attachment.lock().unwrap_or_else(PoisonError::into_inner);
        // Checked under the lock so a concurrent close cannot miss the handle.
        let channel = self.channel()?;
        if let Some((_, handle)) = attachment.as_ref() {
            return Ok(*handle);
        }
        let handle = bridge.attach(channel);
        *attachment = Some((Arc::clone(bridge), handle));
        Ok(handle)
    }

    /// Cancel the scope, release the engine handle, then close the transport.
    fn close(&self) {
        if !self.channel.mark_closed() {
            return;
        }

        let attachment = self
            .attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((bridge, handle)) = attachment {
            if let Err(e) = bridge.detach(handle) {
                debug!(job_id = %self.id, error = %e, "Engine handle already released");
            }
        }

        self.transport.close();
        info!(job_id = %self.id, role = %self.self_role, "Job closed");
    }

    async fn run<P: Protocol>(&self, protocol: &P) -> JobResult<P::Output> {
        let channel = self.channel()?;
        let started = Instant::now();
        debug!(job_id = %self.id, protocol = protocol.name(), "Protocol started");

        match protocol.execute(&channel).await {
            Ok(output) => {
                info!(
                    job_id = %self.id,
                    protocol = protocol.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Protocol completed"
                );
                Ok(output)
            }
            Err(e) => {
                warn!(job_id = %self.id, protocol = protocol.name(), error = %e, "Protocol failed");
                Err(e)
            }
        }
    }
}

impl Drop for JobCore {
    fn drop(&mut self) {
        if !self.channel.is_closed() {
            debug!(job_id = %self.id, "Job dropped without close");
            self.close();
        }
    }
}

/// A two-party job.
pub struct Job2P {
    core: JobCore,
    role: Role,
}

impl Job2P {
    /// Bind `transport` to a two-party job.
    ///
    /// # Arguments
    /// * `transport` - Connected transport whose own role is `role`
    /// * `role` - Our side of the pair
    /// * `names` - Party names indexed by role; non-empty and distinct
    pub fn new<S: Into<String>>(
        transport: Arc<dyn Transport>,
        role: Role,
        names: [S; 2],
    ) -> JobResult<Self> {
        Self::build(transport, role, names, None)
    }

    /// Like [`Job2P::new`], with the job's scope derived from `parent`.
    pub fn with_parent<S: Into<String>>(
        transport: Arc<dyn Transport>,
        role: Role,
        names: [S; 2],
        parent: &CancellationToken,
    ) -> JobResult<Self> {
        Self::build(transport, role, names, Some(parent))
    }

    fn build<S: Into<String>>(
        transport: Arc<dyn Transport>,
        role: Role,
        names: [S; 2],
        parent: Option<&CancellationToken>,
    ) -> JobResult<Self> {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let core = JobCore::new(transport, role.role_id(), names, parent)?;
        Ok(Self { core, role })
    }

    pub fn id(&self) -> Uuid {
        self.core.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn names(&self) -> &[String] {
        &self.core.names
    }

    pub fn peer_name(&self) -> &str {
        &self.core.names[self.role.peer().role_id().index()]
    }

    /// The engine-facing channel. Fails with [`JobError::Closed`] after close.
    pub fn channel(&self) -> JobResult<Arc<JobChannel>> {
        self.core.channel()
    }

    /// Register the channel with `bridge`. The handle is released on close.
    pub fn attach(&self, bridge: &Arc<CallbackBridge>) -> JobResult<Handle> {
        self.core.attach(bridge)
    }

    pub fn is_closed(&self) -> bool {
        self.core.channel.is_closed()
    }

    pub async fn run<P: Protocol>(&self, protocol: &P) -> JobResult<P::Output> {
        self.core.run(protocol).await
    }

    /// Idempotent; safe to call while a protocol is running.
    pub fn close(&self) -> JobResult<()> {
        self.core.close();
        Ok(())
    }
}

/// An n-party job.
pub struct JobMP {
    core: JobCore,
}

impl JobMP {
    /// Bind `transport` to an n-party job where we are `self_role`.
    ///
    /// `names[i]` names role `i`; at least two, all non-empty and distinct.
    pub fn new<I, S>(transport: Arc<dyn Transport>, self_role: RoleId, names: I) -> JobResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let core = JobCore::new(transport, self_role, names, None)?;
        Ok(Self { core })
    }

    pub fn with_parent<I, S>(
        transport: Arc<dyn Transport>,
        self_role: RoleId,
        names: I,
        parent: &CancellationToken,
    ) -> JobResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let core = JobCore::new(transport, self_role, names, Some(parent))?;
        Ok(Self { core })
    }

    pub fn id(&self) -> Uuid {
        self.core.id
    }

    pub fn self_role(&self) -> RoleId {
        self.core.self_role
    }

    pub fn party_count(&self) -> usize {
        self.core.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.core.names
    }

    pub fn channel(&self) -> JobResult<Arc<JobChannel>> {
        self.core.channel()
    }

    pub fn attach(&self, bridge: &Arc<CallbackBridge>) -> JobResult<Handle> {
        self.core.attach(bridge)
    }

    pub fn is_closed(&self) -> bool {
        self.core.channel.is_closed()
    }

    pub async fn run<P: Protocol>(&self, protocol: &P) -> JobResult<P::Output> {
        self.core.run(protocol).await
    }

    pub fn close(&self) -> JobResult<()> {
        self.core.close();
        Ok(())
    }
}
