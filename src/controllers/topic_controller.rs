//! KafkaTopic controller
//!
//! Watches KafkaTopic resources and triggers reconciliation.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    api::ListParams,
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as FinalizerEvent},
        watcher::Config as WatcherConfig,
    },
    Api, Client, ResourceExt,
};
use tracing::{error, info, instrument, warn};

use crate::controllers::Context;
use crate::crd::KafkaTopic;
use crate::error::{Error, Result};
use crate::metrics;
use crate::reconcilers::kafka_topic as topic_reconciler;

/// Finalizer name for KafkaTopic resources
const FINALIZER_NAME: &str = "kafka.oso.sh/topic-finalizer";

/// Requeue delay after a failure no retry will fix
const VALIDATION_REQUEUE: Duration = Duration::from_secs(300);

/// Run the KafkaTopic controller
pub async fn run(client: Client, context: Arc<Context>) {
    let api: Api<KafkaTopic> = Api::all(client.clone());

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("KafkaTopic CRD not installed: {}", e);
        return;
    }

    info!("Starting KafkaTopic controller");
    metrics::OPERATOR_HEALTH.set(1.0);

    Controller::new(api, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    info!(
                        name = %obj.name,
                        namespace = obj.namespace.as_deref().unwrap_or("default"),
                        "Reconciled KafkaTopic"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation error");
                    metrics::RECONCILIATION_ERRORS.with_label_values(&["KafkaTopic"]).inc();
                }
            }
        })
        .await;

    metrics::OPERATOR_HEALTH.set(0.0);
}

/// Main reconciliation function
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<KafkaTopic>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&["KafkaTopic"])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&["KafkaTopic"]).inc();

    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<KafkaTopic> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&api, FINALIZER_NAME, obj, |event| async {
        match event {
            FinalizerEvent::Apply(topic) => apply(topic, ctx.clone()).await,
            FinalizerEvent::Cleanup(topic) => cleanup(topic, ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::Finalizer(Box::new(e)))
}

/// Apply reconciliation (create/update)
async fn apply(topic: Arc<KafkaTopic>, ctx: Arc<Context>) -> Result<Action> {
    let name = topic.name_any();
    let namespace = topic.namespace().unwrap_or_else(|| "default".to_string());
    let generation = topic.metadata.generation.unwrap_or(0);

    info!(
        name = %name,
        namespace = %namespace,
        generation = generation,
        "Reconciling KafkaTopic"
    );

    // Validate the spec
    if let Err(e) = topic_reconciler::validate(&topic) {
        warn!(error = %e, "Validation failed");
        topic_reconciler::update_status_failed(&topic, &ctx.client, &namespace, &e).await?;
        return Ok(Action::requeue(VALIDATION_REQUEUE));
    }

    let desired = topic_reconciler::desired_spec(&topic);
    let result = topic_reconciler::sync(
        &ctx.reconciler,
        &desired,
        topic.status.as_ref(),
        topic.spec.adopt_existing,
    )
    .await;

    match result {
        Ok(outcome) => {
            info!(
                topic = %outcome.state.name,
                action = ?outcome.action,
                partitions = outcome.state.partition_count,
                replication_factor = outcome.state.replication_factor,
                "Topic in sync"
            );
            topic_reconciler::update_status_ready(&topic, &ctx.client, &namespace, &outcome)
                .await?;
            Ok(Action::requeue(ctx.config.resync_interval))
        }
        Err(e) if e.is_validation() => {
            warn!(error = %e, "Declared change rejected");
            topic_reconciler::update_status_failed(&topic, &ctx.client, &namespace, &e).await?;
            Ok(Action::requeue(VALIDATION_REQUEUE))
        }
        Err(e) => {
            if let Err(status_err) =
                topic_reconciler::update_status_failed(&topic, &ctx.client, &namespace, &e).await
            {
                warn!(error = %status_err, "Failed to record failure in status");
            }
            Err(e)
        }
    }
}

/// Cleanup when resource is being deleted
async fn cleanup(topic: Arc<KafkaTopic>, ctx: Arc<Context>) -> Result<Action> {
    let name = topic.name_any();
    info!(name = %name, "Cleaning up KafkaTopic");

    topic_reconciler::cleanup(&ctx.reconciler, &topic).await?;

    metrics::CLEANUPS.with_label_values(&["KafkaTopic"]).inc();

    Ok(Action::await_change())
}

/// Error policy for the controller
fn error_policy(obj: Arc<KafkaTopic>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    error!(
        name = %name,
        error = %error,
        "Reconciliation failed, scheduling retry"
    );

    let requeue_duration = match error.cause() {
        Error::Kube(_) | Error::Connection(_) => Duration::from_secs(30),
        Error::Config(_) | Error::Validation(_) | Error::UnsupportedChange(_) => VALIDATION_REQUEUE,
        Error::TopicOperation { .. } | Error::Protocol(_) => Duration::from_secs(60),
        _ => Duration::from_secs(30),
    };

    Action::requeue(requeue_duration)
}
