//! Migration orchestrator
//!
//! Drives a pool from its live state to a desired [`PoolConfig`].
//!
//! ```text
//! Fetching -> ClassifyChange -> InPlace ----------------------------> Done
//!                            -> Migrating -> Converging -> Swapping -> Done
//! ```
//!
//! Any state can end in `Failed`. A failed migration is not rolled back: both
//! pools stay at the last targets written, and calling [`MigrationOrchestrator::apply`]
//! again with the same inputs carries the rollout forward. Rerunning with the
//! failed run's generation id adopts the replacement it left behind instead
//! of starting another one.
//!
//! While converging, the replacement pool and the original pool take turns:
//! each iteration waits for both pools to settle, then moves exactly one of
//! them one worker closer to its final target. The turn passes on every
//! iteration, including those where the pool whose turn it is has already
//! arrived.

use crate::error::MigrationError;
use crate::metadata::{GenerationId, ORIGINAL_REPLICAS_ANNOTATION};
use crate::poller::{poll, poll_for};
use crate::readiness::ReadinessOracle;
use crate::spec_writer::{
    DEFAULT_REPLICAS, generation_of, materialize, set_desired_replicas, take_original_replicas,
    template_changed, write_config,
};
use crds::PoolConfig;
use pool_client::{Pool, PoolClientTrait, PoolError, PoolRef};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Timing of a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Interval between convergence checks
    pub poll_interval: Duration,
    /// Deadline of each convergence wait
    pub step_timeout: Duration,
    /// How long every component of a worker must have been running
    pub settle_duration: Duration,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            step_timeout: Duration::from_secs(120),
            settle_duration: Duration::from_secs(30),
        }
    }
}

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    Fetching,
    ClassifyChange,
    InPlace,
    Migrating,
    Converging,
    Swapping,
    Done,
    Failed,
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fetching => "Fetching",
            Self::ClassifyChange => "ClassifyChange",
            Self::InPlace => "InPlace",
            Self::Migrating => "Migrating",
            Self::Converging => "Converging",
            Self::Swapping => "Swapping",
            Self::Done => "Done",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Which of the two pools a step scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolRole {
    Original,
    Replacement,
}

/// One target change made while converging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleStep {
    pub role: PoolRole,
    pub target: i32,
}

/// How a configuration was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationPath {
    /// Written to the live pool directly
    InPlace,
    /// Rolled out through a replacement pool
    Migrated {
        generation: GenerationId,
        steps: Vec<ScaleStep>,
    },
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    /// The pool as stored after the run
    pub pool: Pool,
    pub path: MigrationPath,
}

impl MigrationOutcome {
    /// Number of target changes made while converging
    pub fn scale_steps(&self) -> usize {
        match &self.path {
            MigrationPath::InPlace => 0,
            MigrationPath::Migrated { steps, .. } => steps.len(),
        }
    }
}

/// Applies configurations to pools.
pub struct MigrationOrchestrator {
    client: Arc<dyn PoolClientTrait>,
    oracle: ReadinessOracle,
    config: MigrationConfig,
}

impl fmt::Debug for MigrationOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MigrationOrchestrator {
    pub fn new(client: Arc<dyn PoolClientTrait>, config: MigrationConfig) -> Self {
        let oracle = ReadinessOracle::new(Arc::clone(&client), config.settle_duration);
        Self {
            client,
            oracle,
            config,
        }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Bring the pool at `pool_ref` to `desired`.
    ///
    /// A migration, if one is needed, uses a freshly generated generation id.
    pub async fn apply(
        &self,
        pool_ref: &PoolRef,
        desired: &PoolConfig,
    ) -> Result<MigrationOutcome, MigrationError> {
        self.run(pool_ref, desired, GenerationId::generate()).await
    }

    /// Like [`apply`](Self::apply), but a migration uses `generation` as its
    /// generation id. Blank ids are rejected before the pool is read.
    pub async fn apply_with_generation(
        &self,
        pool_ref: &PoolRef,
        desired: &PoolConfig,
        generation: &str,
    ) -> Result<MigrationOutcome, MigrationError> {
        let generation = GenerationId::parse(generation)?;
        self.run(pool_ref, desired, generation).await
    }

    /// Pick the generation id for the next run on `pool_ref`.
    ///
    /// `pending` is the id of an earlier run that did not finish. Its
    /// replacement pool is reused when it still runs the desired template.
    /// A replacement running another template is drained and deleted, and
    /// one whose workers the original pool already adopted is deleted
    /// without touching them. Anything else gets a fresh id.
    pub async fn resume_generation(
        &self,
        pool_ref: &PoolRef,
        desired: &PoolConfig,
        pending: Option<&str>,
    ) -> Result<GenerationId, MigrationError> {
        let Some(generation) = pending.and_then(|raw| GenerationId::parse(raw).ok()) else {
            return Ok(GenerationId::generate());
        };
        let replacement_ref = pool_ref.with_name(generation.replacement_name(&pool_ref.name));

        let original = self.client.get(&pool_ref.namespace, &pool_ref.name).await?;
        if generation_of(&original).as_ref() == Some(&generation) {
            match self
                .client
                .delete(&replacement_ref.namespace, &replacement_ref.name)
                .await
            {
                Ok(()) => info!(pool = %pool_ref, replacement = %replacement_ref, "Deleted replacement left after swap"),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(GenerationId::generate());
        }

        match self
            .client
            .get(&replacement_ref.namespace, &replacement_ref.name)
            .await
        {
            Ok(replacement)
                if generation_of(&replacement).as_ref() == Some(&generation)
                    && !template_changed(&replacement, &desired.template) =>
            {
                info!(pool = %pool_ref, %generation, "Resuming unfinished migration");
                Ok(generation)
            }
            Ok(_) => {
                warn!(
                    pool = %pool_ref,
                    replacement = %replacement_ref,
                    "Replacement of unfinished migration runs another template, retiring it"
                );
                self.retire(&replacement_ref).await?;
                Ok(GenerationId::generate())
            }
            Err(e) if e.is_not_found() => Ok(GenerationId::generate()),
            Err(e) => Err(e.into()),
        }
    }

    /// Scale the pool at `pool_ref` to zero, wait until it has converged
    /// there, and delete it.
    pub async fn retire(&self, pool_ref: &PoolRef) -> Result<(), MigrationError> {
        self.scale(pool_ref, 0).await?;
        let oracle = &self.oracle;
        poll(self.config.poll_interval, self.config.step_timeout, move || {
            oracle.pool_converged(pool_ref)
        })
        .await?;
        self.client
            .delete(&pool_ref.namespace, &pool_ref.name)
            .await?;
        info!(pool = %pool_ref, "Retired pool");
        Ok(())
    }

    async fn run(
        &self,
        pool_ref: &PoolRef,
        desired: &PoolConfig,
        generation: GenerationId,
    ) -> Result<MigrationOutcome, MigrationError> {
        desired.validate()?;

        let result = self.drive(pool_ref, desired, generation).await;
        match &result {
            Ok(_) => self.enter(pool_ref, MigrationPhase::Done),
            Err(e) => {
                self.enter(pool_ref, MigrationPhase::Failed);
                error!(pool = %pool_ref, error = %e, "Failed to apply pool configuration");
            }
        }
        result
    }

    async fn drive(
        &self,
        pool_ref: &PoolRef,
        desired: &PoolConfig,
        generation: GenerationId,
    ) -> Result<MigrationOutcome, MigrationError> {
        self.enter(pool_ref, MigrationPhase::Fetching);
        let mut current = self.client.get(&pool_ref.namespace, &pool_ref.name).await?;
        let original_replicas = take_original_replicas(&mut current)?;

        self.enter(pool_ref, MigrationPhase::ClassifyChange);
        match generation_of(&current) {
            Some(live) if !template_changed(&current, &desired.template) => {
                self.update_in_place(current, desired, &live, original_replicas)
                    .await
            }
            Some(_) => {
                self.migrate(pool_ref, desired, generation, original_replicas)
                    .await
            }
            None => {
                info!(
                    pool = %pool_ref,
                    "Pool has no generation label; migrating to a labelled generation"
                );
                self.migrate(pool_ref, desired, generation, original_replicas)
                    .await
            }
        }
    }

    async fn update_in_place(
        &self,
        mut pool: Pool,
        desired: &PoolConfig,
        live: &GenerationId,
        original_replicas: i32,
    ) -> Result<MigrationOutcome, MigrationError> {
        let pool_ref = pool.pool_ref();
        self.enter(&pool_ref, MigrationPhase::InPlace);

        let replicas = desired.replicas.unwrap_or(original_replicas);
        write_config(&mut pool, desired, live)?;
        set_desired_replicas(&mut pool, replicas)?;
        self.client.update(&pool).await?;
        info!(pool = %pool_ref, replicas, "Updated pool in place");

        let pool = self
            .client
            .get(&pool_ref.namespace, &pool_ref.name)
            .await?;
        Ok(MigrationOutcome {
            pool,
            path: MigrationPath::InPlace,
        })
    }

    async fn migrate(
        &self,
        pool_ref: &PoolRef,
        desired: &PoolConfig,
        generation: GenerationId,
        original_replicas: i32,
    ) -> Result<MigrationOutcome, MigrationError> {
        self.enter(pool_ref, MigrationPhase::Migrating);
        self.record_original_replicas(pool_ref, original_replicas)
            .await?;

        let replacement_ref = pool_ref.with_name(generation.replacement_name(&pool_ref.name));
        let replacement_target = desired.replicas.unwrap_or(DEFAULT_REPLICAS);
        let replacement_start = match self
            .adopt_replacement(&replacement_ref, desired, &generation, replacement_target)
            .await?
        {
            Some(start) => start,
            None => {
                let mut replacement =
                    materialize(&replacement_ref, desired, &generation, replacement_target)?;
                replacement.target_replicas = 0;
                self.client.create(&replacement).await?;
                0
            }
        };
        info!(
            pool = %pool_ref,
            replacement = %replacement_ref,
            from = original_replicas,
            to = replacement_target,
            start = replacement_start,
            "Replacement pool in place"
        );

        self.enter(pool_ref, MigrationPhase::Converging);
        let steps = self
            .cross_scale(
                pool_ref,
                &replacement_ref,
                original_replicas,
                replacement_start,
                replacement_target,
            )
            .await?;

        self.enter(pool_ref, MigrationPhase::Swapping);
        let pool = self.swap(pool_ref, &replacement_ref).await?;

        Ok(MigrationOutcome {
            pool,
            path: MigrationPath::Migrated { generation, steps },
        })
    }

    /// Store the requested count on the original pool if it does not carry
    /// one yet, so an interrupted migration resumes from it rather than from
    /// a lowered live target.
    async fn record_original_replicas(
        &self,
        pool_ref: &PoolRef,
        replicas: i32,
    ) -> Result<(), MigrationError> {
        let mut pool = self.client.get(&pool_ref.namespace, &pool_ref.name).await?;
        if pool.annotations.contains_key(ORIGINAL_REPLICAS_ANNOTATION) {
            return Ok(());
        }
        pool.annotations
            .insert(ORIGINAL_REPLICAS_ANNOTATION.to_string(), replicas.to_string());
        self.client.update(&pool).await?;
        debug!(pool = %pool_ref, replicas, "Recorded original replica count");
        Ok(())
    }

    /// Take over a replacement left behind by an earlier run of the same
    /// generation. Returns the target to continue from, or `None` when no
    /// replacement exists yet.
    ///
    /// A pool under the replacement name that belongs to another generation
    /// or runs another template is an error.
    async fn adopt_replacement(
        &self,
        replacement_ref: &PoolRef,
        desired: &PoolConfig,
        generation: &GenerationId,
        replacement_target: i32,
    ) -> Result<Option<i32>, MigrationError> {
        let mut existing = match self
            .client
            .get(&replacement_ref.namespace, &replacement_ref.name)
            .await
        {
            Ok(pool) => pool,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if generation_of(&existing).as_ref() != Some(generation)
            || template_changed(&existing, &desired.template)
        {
            return Err(PoolError::Conflict(format!(
                "pool {replacement_ref} already exists and is not a replacement for generation {generation}"
            ))
            .into());
        }

        let start = existing.target_replicas.clamp(0, replacement_target);
        write_config(&mut existing, desired, generation)?;
        set_desired_replicas(&mut existing, replacement_target)?;
        existing.target_replicas = start;
        self.client.update(&existing).await?;
        info!(pool = %replacement_ref, start, "Adopted replacement pool from an earlier run");
        Ok(Some(start))
    }

    async fn cross_scale(
        &self,
        original: &PoolRef,
        replacement: &PoolRef,
        original_replicas: i32,
        replacement_start: i32,
        replacement_target: i32,
    ) -> Result<Vec<ScaleStep>, MigrationError> {
        const ORIGINAL_TARGET: i32 = 0;

        let mut original_step = original_replicas;
        let mut replacement_step = replacement_start;
        let mut scale_replacement = true;
        let mut steps = Vec::new();

        loop {
            let oracle = &self.oracle;
            let (original_pool, replacement_pool) = poll_for(
                self.config.poll_interval,
                self.config.step_timeout,
                move || oracle.crossed(original, replacement),
            )
            .await?;

            if at_target(&original_pool, ORIGINAL_TARGET)
                && at_target(&replacement_pool, replacement_target)
            {
                debug!(pool = %original, "Both pools reached their final targets");
                return Ok(steps);
            }

            if scale_replacement {
                if replacement_step < replacement_target {
                    replacement_step += 1;
                    self.scale(replacement, replacement_step).await?;
                    steps.push(ScaleStep {
                        role: PoolRole::Replacement,
                        target: replacement_step,
                    });
                }
            } else if original_step > ORIGINAL_TARGET {
                original_step -= 1;
                self.scale(original, original_step).await?;
                steps.push(ScaleStep {
                    role: PoolRole::Original,
                    target: original_step,
                });
            }
            scale_replacement = !scale_replacement;
        }
    }

    async fn scale(&self, pool_ref: &PoolRef, replicas: i32) -> Result<(), MigrationError> {
        let mut pool = self.client.get(&pool_ref.namespace, &pool_ref.name).await?;
        pool.target_replicas = replicas;
        self.client.update(&pool).await?;
        info!(pool = %pool_ref, replicas, "Scaled pool");
        Ok(())
    }

    /// Give the replacement's spec the original name. The recreated pool
    /// adopts the replacement's workers through the identical selector.
    async fn swap(&self, original: &PoolRef, replacement: &PoolRef) -> Result<Pool, MigrationError> {
        self.client
            .delete(&original.namespace, &original.name)
            .await?;

        let mut promoted = self
            .client
            .get(&replacement.namespace, &replacement.name)
            .await?;
        promoted.name = original.name.clone();
        promoted.resource_version = None;
        promoted.uid = None;
        promoted.generation = None;
        promoted.observed_generation = None;
        promoted.observed_replicas = 0;
        self.client.create(&promoted).await?;

        self.client
            .delete(&replacement.namespace, &replacement.name)
            .await?;
        info!(pool = %original, replacement = %replacement, "Swapped replacement pool into place");

        Ok(self
            .client
            .get(&original.namespace, &original.name)
            .await?)
    }

    fn enter(&self, pool_ref: &PoolRef, phase: MigrationPhase) {
        info!(pool = %pool_ref, %phase, "Entering migration phase");
    }
}

fn at_target(pool: &Pool, target: i32) -> bool {
    pool.target_replicas == target && pool.observed_replicas == target
}
