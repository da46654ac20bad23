//! # Courtside Runtime
//!
//! Effect execution and retry for the Courtside booking engine.
//!
//! Reducers run inside a store transaction and only *describe* side effects.
//! Once the transaction commits, the caller hands the collected effects to
//! [`execute`], which runs them and returns any follow-up actions they
//! produced. If the transaction rolls back the effects are simply dropped, so
//! nothing is ever published for state that did not persist.
//!
//! ## Example
//!
//! ```ignore
//! let effects = reducer.reduce(&mut state, action, &env);
//! tx.commit().await?;
//! let feedback = courtside_runtime::execute(effects).await;
//! ```

use courtside_core::effect::Effect;
use futures::future::{join_all, BoxFuture, FutureExt};

/// Retry logic with exponential backoff
pub mod retry;

/// Execute a batch of effects, returning the actions they fed back.
///
/// Top-level effects run concurrently.
pub async fn execute<A, I>(effects: I) -> Vec<A>
where
    A: Send + 'static,
    I: IntoIterator<Item = Effect<A>>,
{
    let batch: Vec<Effect<A>> = effects.into_iter().collect();
    if batch.is_empty() {
        return Vec::new();
    }
    execute_one(Effect::Parallel(batch)).await
}

fn execute_one<A>(effect: Effect<A>) -> BoxFuture<'static, Vec<A>>
where
    A: Send + 'static,
{
    async move {
        match effect {
            Effect::None => {
                tracing::trace!("Executing Effect::None (no-op)");
                Vec::new()
            },
            Effect::Future(fut) => {
                tracing::trace!("Executing Effect::Future");
                metrics::counter!("courtside_effects_executed_total", "type" => "future")
                    .increment(1);
                fut.await.into_iter().collect()
            },
            Effect::Parallel(effects) => {
                let results = join_all(effects.into_iter().map(execute_one)).await;
                results.into_iter().flatten().collect()
            },
        }
    }
    .boxed()
}
