// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The reconciliation loop.

A [Reconciler] moves through [ReconcilerState::Initializing] once, then
repeats cycles while its [Scheduler] permits. A cycle resolves every
channel, ingests into the pool, and republishes (meta-packages, then
indices, then the signed release) only when the pool changed or an
earlier republish failed.

Channel failures are logged and reported per channel. Republish failures
leave the previous tree live. Only [MirrorError::Setup] ends the loop.
*/

pub mod scheduler;

pub use scheduler::{CountingScheduler, IntervalScheduler, Scheduler};

use {
    crate::{
        config::{ChannelConfig, MirrorConfig},
        error::{MirrorError, Result},
        meta::{MetaPackageSynthesizer, SynthesisReport},
        pool::{Cleanup, PoolManager, PruneReport},
        repository::{
            index::{IndexBuilder, IndexSummary},
            layout::RepositoryLayout,
            release::ReleaseBuilder,
        },
        signing::{GpgSigner, ReleaseSigner},
        tool::ProcessToolRunner,
        upstream::{
            http::{HttpUpstreamClient, UpstreamClient},
            resolver_for_channel, Resolution, SourceResolver,
        },
    },
    chrono::Utc,
    log::{error, info, warn},
    std::sync::Arc,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReconcilerState {
    Initializing,
    Cycling,
    Stopped,
}

/// What one cycle did.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Channels whose pool directory changed.
    pub changed_channels: Vec<String>,
    /// Failures, keyed by channel name. A channel may both change and fail.
    pub failures: Vec<(String, MirrorError)>,
    pub republished: bool,
    pub publish_error: Option<MirrorError>,
}

impl CycleReport {
    pub fn changed(&self) -> bool {
        !self.changed_channels.is_empty()
    }
}

/// What a republish wrote.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PublishReport {
    pub synthesis: SynthesisReport,
    pub index: IndexSummary,
}

/// Outcome of reconciling a single channel.
#[derive(Debug, Default)]
struct ChannelOutcome {
    changed: bool,
    errors: Vec<MirrorError>,
}

pub struct Reconciler {
    config: MirrorConfig,
    layout: RepositoryLayout,
    resolvers: Vec<Box<dyn SourceResolver>>,
    pool: PoolManager,
    signer: Arc<dyn ReleaseSigner>,
    state: ReconcilerState,
    pending_publish: bool,
}

impl Reconciler {
    pub fn new(
        config: MirrorConfig,
        client: Arc<dyn UpstreamClient>,
        signer: Arc<dyn ReleaseSigner>,
    ) -> Result<Self> {
        config.validate()?;

        let resolvers = config
            .channels
            .iter()
            .map(|channel| resolver_for_channel(&config, channel, client.clone()))
            .collect::<Result<Vec<_>>>()?;

        let layout = RepositoryLayout::new(&config);
        let pool = PoolManager::new(layout.clone(), client, config.verify_upstream_digests);

        Ok(Self {
            config,
            layout,
            resolvers,
            pool,
            signer,
            state: ReconcilerState::Initializing,
            pending_publish: false,
        })
    }

    /// Reconciler talking to the real upstream APIs and signing with `gpg`.
    pub fn from_config(config: MirrorConfig) -> Result<Self> {
        let client = Arc::new(HttpUpstreamClient::new(&config)?);
        let runner = Arc::new(ProcessToolRunner::new(config.tool_timeout()));
        let signer = Arc::new(GpgSigner::from_config(&config, runner));

        Self::new(config, client, signer)
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn state(&self) -> ReconcilerState {
        self.state
    }

    /// Whether the last republish failed and will be retried next cycle.
    pub fn pending_publish(&self) -> bool {
        self.pending_publish
    }

    /// Create the directory layout, check the signing identity and remove
    /// staging files left by an interrupted run.
    pub async fn prepare(&self) -> Result<()> {
        info!("preparing repository at {}", self.layout.root().display());

        self.layout.ensure()?;
        let signer = self.signer.clone();
        blocking(move || signer.check_identity()).await?;

        for channel in &self.config.channels {
            if let Err(e) = self.pool.sweep_staging(channel) {
                warn!("{}: cannot sweep staging files: {}", channel.name, e);
            }
        }

        Ok(())
    }

    /// Prepare the tree and publish it once, before any upstream contact.
    ///
    /// Fails only with [MirrorError::Setup]. A failed initial publish is
    /// logged and retried on the next cycle.
    pub async fn initialize(&mut self) -> Result<()> {
        self.state = ReconcilerState::Initializing;
        self.prepare().await?;

        match self.publish().await {
            Ok(_) => self.pending_publish = false,
            Err(e) if e.is_fatal_to_process() => return Err(e),
            Err(e) => {
                error!("initial publish failed: {}", e);
                self.pending_publish = true;
            }
        }

        self.state = ReconcilerState::Cycling;

        Ok(())
    }

    /// Run one reconciliation cycle.
    ///
    /// Never fails as a whole; problems are collected in the report.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        if let Err(e) = self.layout.ensure() {
            error!("cannot restore repository layout: {}", e);
        }

        for resolver in &self.resolvers {
            let channel = resolver.channel();
            let outcome = self.reconcile_channel(resolver.as_ref()).await;

            if outcome.changed {
                report.changed_channels.push(channel.name.clone());
            }
            for e in outcome.errors {
                warn!("{}: {}", channel.name, e);
                report.failures.push((channel.name.clone(), e));
            }
        }

        if report.changed() || self.pending_publish {
            if !report.changed() {
                info!("retrying previously failed publish");
            }

            match self.publish().await {
                Ok(_) => {
                    report.republished = true;
                    self.pending_publish = false;
                }
                Err(e) => {
                    error!("publish failed; previous release stays live: {}", e);
                    self.pending_publish = true;
                    report.publish_error = Some(e);
                }
            }
        } else {
            info!("no changes; skipping publish");
        }

        info!(
            "cycle finished: {} changed, {} failure(s), republished: {}",
            report.changed_channels.len(),
            report.failures.len(),
            report.republished
        );

        report
    }

    async fn reconcile_channel(&self, resolver: &dyn SourceResolver) -> ChannelOutcome {
        let channel = resolver.channel();
        let mut outcome = ChannelOutcome::default();

        let resolution = match resolver.resolve().await {
            Ok(resolution) => resolution,
            Err(e) => {
                outcome.errors.push(e);
                return outcome;
            }
        };

        match resolution {
            Resolution::Single(artifact) => {
                match self
                    .pool
                    .ensure_present(&artifact, channel, Cleanup::for_channel(channel))
                    .await
                {
                    Ok(entry) => outcome.changed |= entry.is_some(),
                    Err(e) => {
                        outcome.errors.push(e);
                        return outcome;
                    }
                }

                if channel.keep_latest > 1 {
                    self.prune_into(channel, &mut outcome);
                }
            }
            Resolution::Grouped(groups) => {
                if groups.is_empty() {
                    warn!("{}: no complete groups upstream", channel.name);
                }

                let (entries, errors) = self.pool.ensure_groups(&groups, channel).await;
                outcome.changed |= !entries.is_empty();
                outcome.errors.extend(errors);

                self.prune_into(channel, &mut outcome);
            }
        }

        outcome
    }

    fn prune_into(&self, channel: &ChannelConfig, outcome: &mut ChannelOutcome) {
        match self.pool.prune(channel, channel.keep_latest) {
            Ok(report) => outcome.changed |= !report.is_empty(),
            Err(e) => outcome.errors.push(e),
        }
    }

    /// Synthesize meta-packages, rebuild indices, then sign and publish the release.
    ///
    /// Indices only become visible once the release describing them is signed.
    pub async fn publish(&self) -> Result<PublishReport> {
        let config = self.config.clone();
        let signer = self.signer.clone();

        blocking(move || publish_repository(&config, signer.as_ref())).await
    }

    /// Apply every channel's retention policy.
    ///
    /// Channels that fail to prune are logged and skipped.
    pub fn prune_all(&self) -> PruneReport {
        let mut report = PruneReport::default();

        for channel in &self.config.channels {
            match self.pool.prune(channel, channel.keep_latest) {
                Ok(pruned) => report.removed.extend(pruned.removed),
                Err(e) => warn!("{}: prune failed: {}", channel.name, e),
            }
        }

        report
    }

    /// Initialize, then run cycles until the scheduler stops them.
    pub async fn run<S: Scheduler + ?Sized>(&mut self, scheduler: &mut S) -> Result<()> {
        if let Err(e) = self.initialize().await {
            self.state = ReconcilerState::Stopped;
            return Err(e);
        }

        loop {
            let report = self.run_cycle().await;

            if let Some(e) = report.publish_error {
                if e.is_fatal_to_process() {
                    self.state = ReconcilerState::Stopped;
                    return Err(e);
                }
            }

            if !scheduler.wait_next().await {
                break;
            }
        }

        self.state = ReconcilerState::Stopped;
        info!("reconciliation loop stopped");

        Ok(())
    }
}

fn publish_repository(config: &MirrorConfig, signer: &dyn ReleaseSigner) -> Result<PublishReport> {
    let synthesis = MetaPackageSynthesizer::new(config).synthesize()?;
    let indices = IndexBuilder::new(config).render()?;
    ReleaseBuilder::new(config, signer).publish_indices(Utc::now(), &indices)?;

    Ok(PublishReport {
        synthesis,
        index: indices.summary(),
    })
}

/// Run filesystem-heavy work and `gpg` calls on the blocking thread pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}
