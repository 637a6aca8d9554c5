use super::*;
use kubert::index::{IndexClusterResource, IndexNamespacedResource};
use maplit::btreemap;
use vap_controller_k8s_api::{
    policy::{Exception, Rule},
    ClusterPolicySpec, ObjectMeta, OwnerReference, PolicyExceptionSpec,
    ValidatingAdmissionPolicyBindingSpec, ValidatingAdmissionPolicySpec,
};

struct TestIndex {
    index: SharedIndex,
    queue: WorkQueue<String>,
}

impl TestIndex {
    fn new() -> Self {
        let queue = WorkQueue::default();
        let index = Index::shared(queue.clone(), IndexMetrics::default());
        Self { index, queue }
    }

    fn apply<T>(&self, resource: T)
    where
        Index: IndexClusterResource<T>,
    {
        IndexClusterResource::apply(&mut *self.index.write(), resource)
    }

    fn delete<T>(&self, name: &str)
    where
        Index: IndexClusterResource<T>,
    {
        IndexClusterResource::<T>::delete(&mut *self.index.write(), name.to_string())
    }

    fn apply_exception(&self, polex: PolicyException) {
        IndexNamespacedResource::apply(&mut *self.index.write(), polex)
    }

    fn delete_exception(&self, namespace: &str, name: &str) {
        IndexNamespacedResource::<PolicyException>::delete(
            &mut *self.index.write(),
            namespace.to_string(),
            name.to_string(),
        )
    }

    /// Pops every queued key, in order.
    async fn drain(&self) -> Vec<String> {
        let mut keys = Vec::new();
        while !self.queue.is_empty() {
            let key = self.queue.get().await.expect("queue must be open");
            self.queue.done(&key);
            keys.push(key);
        }
        keys
    }
}

fn mk_policy(name: &str, rule: &str) -> ClusterPolicy {
    let mut policy = ClusterPolicy::new(
        name,
        ClusterPolicySpec {
            rules: vec![Rule {
                name: rule.to_string(),
                ..Default::default()
            }],
            ..Default::default()
        },
    );
    policy.metadata.uid = Some(format!("uid-{name}"));
    policy
}

fn target(policy: &str, rules: &[&str]) -> Exception {
    Exception {
        policy_name: policy.to_string(),
        rule_names: rules.iter().map(|r| r.to_string()).collect(),
    }
}

fn mk_exception(ns: &str, name: &str, exceptions: Vec<Exception>) -> PolicyException {
    let mut polex = PolicyException::new(
        name,
        PolicyExceptionSpec {
            exceptions,
            ..Default::default()
        },
    );
    polex.metadata.namespace = Some(ns.to_string());
    polex
}

fn owned_by(policies: &[&str]) -> ObjectMeta {
    ObjectMeta {
        owner_references: Some(
            policies
                .iter()
                .map(|p| OwnerReference {
                    api_version: "kyverno.io/v1".to_string(),
                    kind: "ClusterPolicy".to_string(),
                    name: p.to_string(),
                    uid: format!("uid-{p}"),
                    controller: Some(true),
                    block_owner_deletion: None,
                })
                .collect(),
        ),
        labels: Some(btreemap!(
            "app.kubernetes.io/managed-by".to_string() => "kyverno".to_string(),
        )),
        ..Default::default()
    }
}

fn mk_vap(name: &str, owners: &[&str], failure_policy: &str) -> ValidatingAdmissionPolicy {
    ValidatingAdmissionPolicy {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..owned_by(owners)
        },
        spec: Some(ValidatingAdmissionPolicySpec {
            failure_policy: Some(failure_policy.to_string()),
            ..Default::default()
        }),
        status: None,
    }
}

fn mk_binding(name: &str, owners: &[&str]) -> ValidatingAdmissionPolicyBinding {
    ValidatingAdmissionPolicyBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..owned_by(owners)
        },
        spec: Some(ValidatingAdmissionPolicyBindingSpec {
            policy_name: owners.first().map(|p| p.to_string()),
            ..Default::default()
        }),
    }
}

// === policies ===

#[tokio::test]
async fn policy_changes_are_gated_on_spec() {
    let test = TestIndex::new();
    test.apply(mk_policy("p1", "r1"));
    assert_eq!(test.drain().await, vec!["p1"]);

    // Resyncs and status writes do not enqueue, but the latest version is
    // retained.
    let mut policy = mk_policy("p1", "r1");
    policy.metadata.resource_version = Some("2".to_string());
    test.apply(policy);
    assert!(test.drain().await.is_empty());
    assert_eq!(
        test.index
            .read()
            .policy("p1")
            .and_then(|p| p.metadata.resource_version),
        Some("2".to_string())
    );

    test.apply(mk_policy("p1", "r2"));
    assert_eq!(test.drain().await, vec!["p1"]);
}

#[tokio::test]
async fn policy_deletes_are_enqueued() {
    let test = TestIndex::new();
    test.apply(mk_policy("p1", "r1"));
    test.drain().await;

    test.delete::<ClusterPolicy>("p1");
    assert_eq!(test.drain().await, vec!["p1"]);
    assert!(test.index.read().policy("p1").is_none());
}

// === exceptions ===

#[tokio::test]
async fn exceptions_enqueue_their_targets() {
    let test = TestIndex::new();
    test.apply(mk_policy("p1", "r1"));
    test.apply(mk_policy("p2", "r1"));
    test.drain().await;

    test.apply_exception(mk_exception(
        "ns-0",
        "e1",
        vec![target("p1", &["r1"]), target("p2", &[])],
    ));
    assert_eq!(test.drain().await, vec!["p1", "p2"]);

    // Unchanged updates are absorbed.
    test.apply_exception(mk_exception(
        "ns-0",
        "e1",
        vec![target("p1", &["r1"]), target("p2", &[])],
    ));
    assert!(test.drain().await.is_empty());

    test.delete_exception("ns-0", "e1");
    assert_eq!(test.drain().await, vec!["p1", "p2"]);
    assert!(test.index.read().exceptions().is_empty());
}

#[tokio::test]
async fn unprojectable_exceptions_are_ignored() {
    let test = TestIndex::new();
    test.apply(mk_policy("p1", "r1"));
    test.drain().await;

    test.apply_exception(mk_exception("ns-0", "e1", vec![target("ns/p1", &["r1"])]));
    test.apply_exception(mk_exception("ns-0", "e2", vec![target("p1", &["r1", "r2"])]));
    assert!(test.drain().await.is_empty());

    // The exceptions are still served to the reconciler, which filters them.
    assert_eq!(test.index.read().exceptions().len(), 2);
}

#[tokio::test]
async fn exceptions_for_unknown_policies_are_ignored() {
    let test = TestIndex::new();
    test.apply(mk_policy("p1", "r1"));
    test.drain().await;

    test.apply_exception(mk_exception("ns-0", "e1", vec![target("p2", &[]), target("p1", &[])]));
    assert_eq!(test.drain().await, vec!["p1"]);
}

#[tokio::test]
async fn retargeted_exceptions_release_old_policy() {
    let test = TestIndex::new();
    test.apply(mk_policy("p1", "r1"));
    test.apply(mk_policy("p2", "r1"));
    test.apply_exception(mk_exception("ns-0", "e1", vec![target("p1", &[])]));
    test.drain().await;

    test.apply_exception(mk_exception("ns-0", "e1", vec![target("p2", &[])]));
    assert_eq!(test.drain().await, vec!["p1", "p2"]);
}

#[tokio::test]
async fn exceptions_are_listed_in_order() {
    let test = TestIndex::new();
    test.apply_exception(mk_exception("ns-1", "a", vec![]));
    test.apply_exception(mk_exception("ns-0", "b", vec![]));
    test.apply_exception(mk_exception("ns-0", "a", vec![]));

    let ids = test
        .index
        .read()
        .exceptions()
        .into_iter()
        .map(|e| format!("{}/{}", e.namespace().unwrap(), e.name_any()))
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["ns-0/a", "ns-0/b", "ns-1/a"]);
}

// === derived objects ===

#[tokio::test]
async fn derived_objects_enqueue_their_owner() {
    let test = TestIndex::new();
    test.apply(mk_policy("p1", "r1"));
    test.drain().await;

    test.apply(mk_vap("p1", &["p1"], "Fail"));
    test.apply(mk_binding("p1-binding", &["p1"]));
    assert_eq!(test.drain().await, vec!["p1"]);
    assert_eq!(
        test.index.read().owner(DerivedKind::Binding, "p1-binding"),
        Some("p1")
    );

    // Unchanged updates are absorbed; spec changes are not.
    test.apply(mk_vap("p1", &["p1"], "Fail"));
    assert!(test.drain().await.is_empty());
    test.apply(mk_vap("p1", &["p1"], "Ignore"));
    assert_eq!(test.drain().await, vec!["p1"]);
    assert!(test.index.read().admission_policy("p1").is_some());
    assert!(test.index.read().binding("p1-binding").is_some());
}

#[tokio::test]
async fn derived_deletes_resolve_through_recorded_owner() {
    let test = TestIndex::new();
    test.apply(mk_policy("p1", "r1"));
    test.apply(mk_vap("p1", &["p1"], "Fail"));
    test.apply(mk_binding("p1-binding", &["p1"]));
    test.drain().await;

    test.delete::<ValidatingAdmissionPolicyBinding>("p1-binding");
    assert_eq!(test.drain().await, vec!["p1"]);
    assert!(test.index.read().binding("p1-binding").is_none());
    assert_eq!(
        test.index.read().owner(DerivedKind::Binding, "p1-binding"),
        None
    );
}

#[tokio::test]
async fn unowned_derived_objects_are_ignored() {
    let test = TestIndex::new();
    test.apply(mk_policy("p1", "r1"));
    test.apply(mk_policy("p2", "r1"));
    test.drain().await;

    test.apply(mk_vap("p0", &[], "Fail"));
    test.apply(mk_vap("p1", &["p1", "p2"], "Fail"));
    test.apply(mk_binding("p3-binding", &["p3"]));
    assert!(test.drain().await.is_empty());

    test.delete::<ValidatingAdmissionPolicy>("p1");
    assert!(test.drain().await.is_empty());
}

#[tokio::test]
async fn reparented_derived_objects_enqueue_both_owners() {
    let test = TestIndex::new();
    test.apply(mk_policy("p1", "r1"));
    test.apply(mk_policy("p2", "r1"));
    test.apply(mk_vap("shared", &["p1"], "Fail"));
    test.drain().await;

    test.apply(mk_vap("shared", &["p2"], "Fail"));
    assert_eq!(test.drain().await, vec!["p1", "p2"]);
}
