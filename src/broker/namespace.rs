//! Model namespace lifecycle

use std::future::Future;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::WatchEvent;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::client::{ListQuery, WatchStream};
use super::{delete_labelled, ensure_resource, Broker, Propagation};
use crate::workload::objects::build_namespace;
use crate::{model_selector, Error, Result};

impl Broker {
    /// Ensure the model namespace exists
    #[instrument(skip(self), fields(namespace = %self.namespace()))]
    pub async fn ensure_namespace(&self) -> Result<()> {
        ensure_resource(
            self.apis.namespaces.as_ref(),
            &build_namespace(self.namespace()),
        )
        .await
    }

    /// Fetch a namespace by name
    pub async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        self.apis.namespaces.get(name).await
    }

    /// Names of every namespace in the cluster
    pub async fn namespaces(&self) -> Result<Vec<String>> {
        let items = self.apis.namespaces.list(&ListQuery::default()).await?;
        Ok(items.iter().map(|ns| ns.name_any()).collect())
    }

    /// Delete the model namespace and the model's storage classes, then
    /// wait until the namespace is gone.
    ///
    /// The wait ends with [`Error::Cancelled`] when `cancel` fires first.
    /// The watch is released on every exit path.
    #[instrument(skip(self, cancel), fields(namespace = %self.namespace()))]
    pub async fn destroy(&self, cancel: CancellationToken) -> Result<()> {
        let ns = self.namespace().to_string();
        let query = ListQuery::fields(format!("metadata.name={ns}"));

        // Watch before deleting so the removal event cannot be missed
        let events = self.apis.namespaces.watch(&query).await?;

        let already_gone = match self
            .apis
            .namespaces
            .delete(&ns, Propagation::Foreground)
            .await
        {
            Ok(()) => false,
            Err(e) if e.is_not_found() => true,
            Err(e) => return Err(e),
        };

        delete_labelled(self.apis.storage_classes.as_ref(), &model_selector(&ns)).await?;

        if already_gone {
            info!("namespace already removed");
            return Ok(());
        }
        self.wait_for_namespace_removal(events, &query, &cancel)
            .await
    }

    async fn wait_for_namespace_removal(
        &self,
        mut events: WatchStream<Namespace>,
        query: &ListQuery,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            match self.until_cancelled(cancel, events.next()).await? {
                Some(Ok(WatchEvent::Deleted(_))) => {
                    info!("namespace removed");
                    return Ok(());
                }
                Some(Ok(WatchEvent::Error(e))) => {
                    warn!(error = %e.message, "namespace watch reported an error");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "namespace watch failed");
                }
                None => {
                    debug!("namespace watch closed, reopening");
                    if self.until_cancelled(cancel, self.namespace_removed()).await?? {
                        info!("namespace removed");
                        return Ok(());
                    }
                    events = self
                        .until_cancelled(cancel, self.apis.namespaces.watch(query))
                        .await??;
                    continue;
                }
            }

            if self.until_cancelled(cancel, self.namespace_removed()).await?? {
                info!("namespace removed");
                return Ok(());
            }
            debug!("namespace still terminating");
        }
    }

    /// Run `step` unless `cancel` fires first
    async fn until_cancelled<F: Future>(
        &self,
        cancel: &CancellationToken,
        step: F,
    ) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("namespace removal wait cancelled");
                Err(Error::cancelled(format!(
                    "waiting for namespace {:?} to terminate",
                    self.namespace()
                )))
            }
            out = step => Ok(out),
        }
    }

    async fn namespace_removed(&self) -> Result<bool> {
        match self.apis.namespaces.get(self.namespace()).await {
            Ok(_) => Ok(false),
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::stream;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use mockall::Sequence;

    use super::*;
    use crate::broker::client::ResourceClient;
    use crate::broker::testing::MockApis;

    fn namespace(name: &str) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Sets its flag when dropped, so tests can see the watch was released
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// A watch that yields `events` and then stays open, flagging its drop
    fn watch_stream(
        events: Vec<WatchEvent<Namespace>>,
        dropped: Arc<AtomicBool>,
    ) -> WatchStream<Namespace> {
        let guard = DropFlag(dropped);
        stream::iter(events.into_iter().map(Ok))
            .chain(stream::pending())
            .map(move |event| {
                let _held = &guard;
                event
            })
            .boxed()
    }

    /// Namespace client whose `get` never answers, as with a stalled API server
    struct StalledGet {
        events: Mutex<Option<WatchStream<Namespace>>>,
    }

    #[async_trait]
    impl ResourceClient<Namespace> for StalledGet {
        async fn get(&self, _name: &str) -> Result<Namespace> {
            std::future::pending().await
        }

        async fn create(&self, _obj: &Namespace) -> Result<Namespace> {
            unreachable!("create")
        }

        async fn update(&self, _obj: &Namespace) -> Result<Namespace> {
            unreachable!("update")
        }

        async fn delete(&self, _name: &str, _propagation: Propagation) -> Result<()> {
            Ok(())
        }

        async fn delete_collection(
            &self,
            _query: &ListQuery,
            _propagation: Propagation,
        ) -> Result<()> {
            unreachable!("delete_collection")
        }

        async fn list(&self, _query: &ListQuery) -> Result<Vec<Namespace>> {
            unreachable!("list")
        }

        async fn watch(&self, _query: &ListQuery) -> Result<WatchStream<Namespace>> {
            let events = self.events.lock().unwrap().take();
            Ok(events.unwrap_or_else(|| stream::pending().boxed()))
        }
    }

    fn expect_teardown(mocks: &mut MockApis, seq: &mut Sequence, stream: WatchStream<Namespace>) {
        mocks
            .namespaces
            .expect_watch()
            .withf(|q: &ListQuery| q.field_selector.as_deref() == Some("metadata.name=test"))
            .times(1)
            .in_sequence(seq)
            .return_once(move |_| Ok(stream));
        mocks
            .namespaces
            .expect_delete()
            .withf(|name: &str, p: &Propagation| name == "test" && *p == Propagation::Foreground)
            .times(1)
            .in_sequence(seq)
            .returning(|_, _| Ok(()));
        mocks
            .storage_classes
            .expect_delete_collection()
            .withf(|q: &ListQuery, _: &Propagation| {
                q.label_selector.as_deref() == Some("juju-model==test")
            })
            .times(1)
            .in_sequence(seq)
            .returning(|_, _| Err(Error::not_found("StorageClass", "juju-model==test")));
    }

    /// Story: ensuring the namespace twice creates it once
    #[tokio::test]
    async fn test_ensure_namespace_is_idempotent() {
        let mut mocks = MockApis::new();
        let mut seq = Sequence::new();
        mocks
            .namespaces
            .expect_update()
            .withf(|ns: &Namespace| {
                ns.name_any() == "test"
                    && ns.labels().get("juju-model").map(String::as_str) == Some("test")
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(Error::not_found("Namespace", "test")));
        mocks
            .namespaces
            .expect_create()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|ns| Ok(ns.clone()));
        mocks
            .namespaces
            .expect_update()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|ns| Ok(ns.clone()));

        let broker = mocks.into_broker();
        broker.ensure_namespace().await.unwrap();
        broker.ensure_namespace().await.unwrap();
    }

    #[tokio::test]
    async fn test_get_namespace_not_found_is_an_error() {
        let mut mocks = MockApis::new();
        mocks
            .namespaces
            .expect_get()
            .returning(|name| Err(Error::not_found("Namespace", name)));

        let err = mocks.into_broker().get_namespace("unknown").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Namespace \"unknown\" not found");
    }

    #[tokio::test]
    async fn test_namespaces_lists_names() {
        let mut mocks = MockApis::new();
        mocks
            .namespaces
            .expect_list()
            .returning(|_| Ok(vec![namespace("test"), namespace("test2")]));

        let names = mocks.into_broker().namespaces().await.unwrap();
        assert_eq!(names, vec!["test".to_string(), "test2".to_string()]);
    }

    /// Story: destroy keeps waiting while the namespace is terminating
    ///
    /// Each watch event triggers a follow-up get. The first still finds the
    /// namespace; the second reports it gone and the wait completes.
    #[tokio::test]
    async fn test_destroy_waits_until_namespace_not_found() {
        let dropped = Arc::new(AtomicBool::new(false));
        let stream = watch_stream(
            vec![
                WatchEvent::Added(namespace("test")),
                WatchEvent::Modified(namespace("test")),
            ],
            dropped.clone(),
        );

        let mut mocks = MockApis::new();
        let mut seq = Sequence::new();
        expect_teardown(&mut mocks, &mut seq, stream);
        mocks
            .namespaces
            .expect_get()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|name| Ok(namespace(name)));
        mocks
            .namespaces
            .expect_get()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|name| Err(Error::not_found("Namespace", name)));

        let broker = mocks.into_broker();
        broker.destroy(CancellationToken::new()).await.unwrap();
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_destroy_completes_on_deleted_event() {
        let dropped = Arc::new(AtomicBool::new(false));
        let stream = watch_stream(vec![WatchEvent::Deleted(namespace("test"))], dropped.clone());

        let mut mocks = MockApis::new();
        let mut seq = Sequence::new();
        expect_teardown(&mut mocks, &mut seq, stream);
        mocks.namespaces.expect_get().never();

        mocks
            .into_broker()
            .destroy(CancellationToken::new())
            .await
            .unwrap();
        assert!(dropped.load(Ordering::SeqCst));
    }

    /// Story: an operator cancels a destroy that would never finish
    ///
    /// The wait surfaces a cancellation, not a not-found, and the watch
    /// is still released.
    #[tokio::test]
    async fn test_destroy_cancellation_releases_watch() {
        let dropped = Arc::new(AtomicBool::new(false));
        let stream = watch_stream(vec![], dropped.clone());

        let mut mocks = MockApis::new();
        let mut seq = Sequence::new();
        expect_teardown(&mut mocks, &mut seq, stream);
        mocks.namespaces.expect_get().never();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            trigger.cancel();
        });

        let err = mocks.into_broker().destroy(cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!err.is_not_found());
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_destroy_of_missing_namespace_skips_wait() {
        let dropped = Arc::new(AtomicBool::new(false));
        let stream = watch_stream(vec![], dropped.clone());

        let mut mocks = MockApis::new();
        mocks.namespaces.expect_watch().return_once(move |_| Ok(stream));
        mocks
            .namespaces
            .expect_delete()
            .returning(|name, _| Err(Error::not_found("Namespace", name)));
        mocks
            .storage_classes
            .expect_delete_collection()
            .times(1)
            .returning(|_, _| Ok(()));
        mocks.namespaces.expect_get().never();

        mocks
            .into_broker()
            .destroy(CancellationToken::new())
            .await
            .unwrap();
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_destroy_reopens_closed_watch() {
        let first = stream::empty().boxed();
        let second = watch_stream(
            vec![WatchEvent::Deleted(namespace("test"))],
            Arc::new(AtomicBool::new(false)),
        );

        let mut mocks = MockApis::new();
        let mut seq = Sequence::new();
        expect_teardown(&mut mocks, &mut seq, first);
        mocks
            .namespaces
            .expect_get()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|name| Ok(namespace(name)));
        mocks
            .namespaces
            .expect_watch()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(move |_| Ok(second));

        mocks
            .into_broker()
            .destroy(CancellationToken::new())
            .await
            .unwrap();
    }

    /// Story: cancellation lands while the follow-up get is stalled
    ///
    /// The watch reports a modification and the confirming get never
    /// answers. Cancelling must still end the wait promptly.
    #[tokio::test]
    async fn test_destroy_cancellation_interrupts_stalled_get() {
        let dropped = Arc::new(AtomicBool::new(false));
        let stream = watch_stream(
            vec![WatchEvent::Modified(namespace("test"))],
            dropped.clone(),
        );

        let mut mocks = MockApis::new();
        mocks
            .storage_classes
            .expect_delete_collection()
            .times(1)
            .returning(|_, _| Ok(()));
        let mut apis = mocks.into_apis();
        apis.namespaces = Arc::new(StalledGet {
            events: Mutex::new(Some(stream)),
        });
        let broker = Broker::new(crate::config::BrokerConfig::new("test"), apis);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(Duration::from_secs(5), broker.destroy(cancel))
            .await
            .expect("destroy ignored cancellation")
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(dropped.load(Ordering::SeqCst));
    }
}
