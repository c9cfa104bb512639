//! Pool specification writer
//!
//! Turns a [`PoolConfig`] into the stored shape of a pool and maintains the
//! migration metadata on it: the generation label in the worker template and
//! selector, and the reserved annotations.

use crate::error::MigrationError;
use crate::metadata::{
    APPLIED_TEMPLATE_ANNOTATION, GENERATION_LABEL, GenerationId, ORIGINAL_REPLICAS_ANNOTATION,
    OWNED_ANNOTATION, RESERVED_ANNOTATIONS,
};
use crds::{PoolConfig, WorkerTemplate};
use pool_client::{Pool, PoolRef};

/// Replica count used when the configuration leaves it unset.
pub const DEFAULT_REPLICAS: i32 = 1;

/// Build a pool for `pool_ref` from `config`, stamped with `generation` and
/// declaring `replicas` workers.
pub fn materialize(
    pool_ref: &PoolRef,
    config: &PoolConfig,
    generation: &GenerationId,
    replicas: i32,
) -> Result<Pool, MigrationError> {
    let mut pool = Pool::new(pool_ref.namespace.clone(), pool_ref.name.clone());
    write_config(&mut pool, config, generation)?;
    set_desired_replicas(&mut pool, replicas)?;
    Ok(pool)
}

/// Overwrite labels, annotations, template and selector of `pool` with
/// `config`. Identity and server-assigned fields are left alone.
pub fn write_config(
    pool: &mut Pool,
    config: &PoolConfig,
    generation: &GenerationId,
) -> Result<(), MigrationError> {
    config.validate()?;

    pool.labels = config.labels.clone();
    pool.annotations = config.annotations.clone();
    pool.annotations
        .insert(OWNED_ANNOTATION.to_string(), "true".to_string());
    pool.annotations.insert(
        APPLIED_TEMPLATE_ANNOTATION.to_string(),
        serde_json::to_string(&user_template(&config.template)).map_err(crds::SpecError::from)?,
    );

    let mut template = config.template.clone();
    template
        .labels
        .insert(GENERATION_LABEL.to_string(), generation.to_string());
    pool.selector = template.labels.clone();
    pool.template = template;
    Ok(())
}

/// Declare `replicas` as both the live target and the user-requested count.
pub fn set_desired_replicas(pool: &mut Pool, replicas: i32) -> Result<(), MigrationError> {
    if replicas < 0 {
        return Err(crds::SpecError::InvalidReplicas(replicas).into());
    }
    pool.target_replicas = replicas;
    pool.annotations.insert(
        ORIGINAL_REPLICAS_ANNOTATION.to_string(),
        replicas.to_string(),
    );
    Ok(())
}

/// Remove the original-replicas annotation from `pool` and return the
/// replica count the user last asked for: the annotation if present, the
/// live target otherwise.
pub fn take_original_replicas(pool: &mut Pool) -> Result<i32, MigrationError> {
    match pool.annotations.remove(ORIGINAL_REPLICAS_ANNOTATION) {
        Some(raw) => match raw.trim().parse::<i32>() {
            Ok(replicas) if replicas >= 0 => Ok(replicas),
            Ok(_) => Err(invalid_annotation(raw, "replica count must not be negative")),
            Err(e) => {
                let reason = e.to_string();
                Err(invalid_annotation(raw, &reason))
            }
        },
        None => Ok(pool.target_replicas),
    }
}

fn invalid_annotation(value: String, reason: &str) -> MigrationError {
    MigrationError::InvalidAnnotation {
        key: ORIGINAL_REPLICAS_ANNOTATION,
        value,
        reason: reason.to_string(),
    }
}

/// The pool's generation id, if it carries a non-blank one.
pub fn generation_of(pool: &Pool) -> Option<GenerationId> {
    pool.template
        .labels
        .get(GENERATION_LABEL)
        .and_then(|raw| GenerationId::parse(raw).ok())
}

/// Whether applying `desired` would change the pool's worker template.
///
/// Uses the template recorded at the last write when present, since the
/// live template also carries whatever the server defaulted.
pub fn template_changed(pool: &Pool, desired: &WorkerTemplate) -> bool {
    let desired = user_template(desired);
    let applied = pool
        .annotations
        .get(APPLIED_TEMPLATE_ANNOTATION)
        .and_then(|raw| serde_json::from_str::<WorkerTemplate>(raw).ok());
    match applied {
        Some(applied) => applied != desired,
        None => user_template(&pool.template) != desired,
    }
}

/// Whether `pool` already carries `desired`: a generation label, an unchanged
/// template, the same labels and user annotations, and a live target equal to
/// the requested replica count. With replicas unset the recorded request
/// stands in for it.
pub fn config_in_sync(pool: &Pool, desired: &PoolConfig) -> bool {
    let recorded = pool
        .annotations
        .get(ORIGINAL_REPLICAS_ANNOTATION)
        .and_then(|raw| raw.trim().parse::<i32>().ok())
        .unwrap_or(pool.target_replicas);
    let requested = desired.replicas.unwrap_or(recorded);
    let live = read_config(pool);

    generation_of(pool).is_some()
        && !template_changed(pool, &desired.template)
        && live.labels == desired.labels
        && live.annotations == desired.annotations
        && recorded == pool.target_replicas
        && requested == pool.target_replicas
}

/// The user-visible view of a pool.
pub fn read_config(pool: &Pool) -> PoolConfig {
    let mut annotations = pool.annotations.clone();
    for key in RESERVED_ANNOTATIONS {
        annotations.remove(key);
    }
    PoolConfig {
        replicas: Some(pool.target_replicas),
        labels: pool.labels.clone(),
        annotations,
        template: user_template(&pool.template),
    }
}

fn user_template(template: &WorkerTemplate) -> WorkerTemplate {
    let mut template = template.clone();
    template.labels.remove(GENERATION_LABEL);
    template
}
