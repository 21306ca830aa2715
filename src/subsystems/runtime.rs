//! Component runtime shared by the long-running parts of the service.
//!
//! A [`Component`] owns everything it needs (state `Arc`s, channel ends) and
//! is consumed by [`spawn_components`], which runs every component on its
//! own task. The first component to fail cancels the shared
//! [`CancellationToken`], so its siblings stop too.

use std::future::Future;
use std::pin::Pin;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::AppError;

/// Boxed future returned by [`Component::run`].
pub type ComponentFuture = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'static>>;

/// An independently running unit such as the HTTP listener or the frame streamer.
pub trait Component: Send + 'static {
    /// Identifier used in log fields.
    fn id(&self) -> &str;

    /// Run until `shutdown` is cancelled or the work is done.
    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture;
}

/// Handle to a set of spawned components; await [`SubsystemHandle::join`].
pub struct SubsystemHandle {
    inner: JoinHandle<Result<(), AppError>>,
}

impl SubsystemHandle {
    /// Wait for every component to exit and return the first error.
    pub async fn join(self) -> Result<(), AppError> {
        match self.inner.await {
            Ok(r) => r,
            Err(e) => Err(AppError::Comms(format!("component manager panicked: {e}"))),
        }
    }
}

/// Spawn every component and return a handle that resolves once all exited.
///
/// A component error or panic cancels `shutdown`; the remaining components
/// are still drained before the first error is returned.
pub fn spawn_components(
    components: Vec<Box<dyn Component>>,
    shutdown: CancellationToken,
) -> SubsystemHandle {
    let handle = tokio::spawn(async move {
        let mut set: JoinSet<Result<(), AppError>> = JoinSet::new();

        for component in components {
            debug!(component = %component.id(), "spawning component");
            set.spawn(component.run(shutdown.clone()));
        }

        let mut first_err: Option<AppError> = None;
        while let Some(res) = set.join_next().await {
            match res {
                Err(e) => {
                    error!("component panicked: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert_with(|| AppError::Comms(format!("component panicked: {e}")));
                }
                Ok(Err(e)) => {
                    error!("component error: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert(e);
                }
                Ok(Ok(())) => {}
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    });

    SubsystemHandle { inner: handle }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UntilCancelled;

    impl Component for UntilCancelled {
        fn id(&self) -> &str {
            "until-cancelled"
        }

        fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
            Box::pin(async move {
                shutdown.cancelled().await;
                Ok(())
            })
        }
    }

    struct Failing;

    impl Component for Failing {
        fn id(&self) -> &str {
            "failing"
        }

        fn run(self: Box<Self>, _shutdown: CancellationToken) -> ComponentFuture {
            Box::pin(async { Err(AppError::Comms("bind failed".into())) })
        }
    }

    #[tokio::test]
    async fn cancellation_stops_all_components() {
        let token = CancellationToken::new();
        let handle = spawn_components(
            vec![Box::new(UntilCancelled), Box::new(UntilCancelled)],
            token.clone(),
        );
        token.cancel();
        assert!(handle.join().await.is_ok());
    }

    #[tokio::test]
    async fn failing_component_cancels_siblings_and_reports_error() {
        let token = CancellationToken::new();
        let handle =
            spawn_components(vec![Box::new(UntilCancelled), Box::new(Failing)], token.clone());
        let err = handle.join().await.unwrap_err();
        assert!(err.to_string().contains("bind failed"));
        assert!(token.is_cancelled());
    }
}
