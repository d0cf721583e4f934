// Copyright 2025 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Equality by desired spec: an observed object matches when everything the
//! builder sets is present with the same value. Fields the API server fills
//! in are ignored.

use crate::types;
use crate::types::v2::LEGACY_ZONE_LABEL;
use k8s_openapi::api::apps::v1;
use k8s_openapi::api::core::v1 as corev1;
use serde_json::Value;
use std::collections::BTreeMap;

/// True when `observed` contains every field of `expected` with an equal value.
/// Arrays must have the same length and match element-wise.
pub fn is_derivative(expected: &Value, observed: &Value) -> bool {
    match (expected, observed) {
        (Value::Null, _) => true,
        (Value::Object(e), Value::Object(o)) => e.iter().all(|(k, ev)| match o.get(k) {
            Some(ov) => is_derivative(ev, ov),
            None => is_empty(ev),
        }),
        (Value::Array(e), Value::Array(o)) => {
            e.len() == o.len() && e.iter().zip(o).all(|(ev, ov)| is_derivative(ev, ov))
        }
        (e, Value::Null) => is_empty(e),
        (e, o) => e == o,
    }
}

fn is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn to_value<T: serde::Serialize>(v: &T) -> Result<Value, types::error::Error> {
    Ok(serde_json::to_value(v)?)
}

fn canonical<T: serde::Serialize>(v: Option<&T>) -> Result<String, types::error::Error> {
    match v {
        Some(v) => Ok(serde_json::to_string(v)?),
        None => Ok(String::new()),
    }
}

/// Tag portion of an image reference, `latest` when absent.
pub fn image_tag(image: &str) -> &str {
    let name = image.split('@').next().unwrap_or(image);
    let last = name.rsplit('/').next().unwrap_or(name);
    match last.split_once(':') {
        Some((_, tag)) => tag,
        None => "latest",
    }
}

fn env_map(env: Option<&Vec<corev1::EnvVar>>) -> Result<BTreeMap<String, String>, types::error::Error> {
    env.into_iter()
        .flatten()
        .map(|e| {
            let value = match &e.value_from {
                Some(from) => serde_json::to_string(from)?,
                None => e.value.clone().unwrap_or_default(),
            };
            Ok((e.name.clone(), value))
        })
        .collect()
}

fn subset(expected: Option<&BTreeMap<String, String>>, observed: Option<&BTreeMap<String, String>>) -> bool {
    expected
        .into_iter()
        .flatten()
        .all(|(k, v)| observed.and_then(|o| o.get(k)) == Some(v))
}

fn pod_template(ss: &v1::StatefulSet) -> Option<&corev1::PodTemplateSpec> {
    ss.spec.as_ref().map(|s| &s.template)
}

/// Whether the observed pool StatefulSet still matches what the builder produces.
pub fn pool_statefulset_matches(
    expected: &v1::StatefulSet,
    observed: &v1::StatefulSet,
) -> Result<bool, types::error::Error> {
    let (Some(e_spec), Some(o_spec)) = (expected.spec.as_ref(), observed.spec.as_ref()) else {
        return Ok(false);
    };
    if e_spec.replicas != o_spec.replicas {
        return Ok(false);
    }

    let (Some(e_tpl), Some(o_tpl)) = (pod_template(expected), pod_template(observed)) else {
        return Ok(false);
    };
    let e_meta = e_tpl.metadata.as_ref();
    let o_meta = o_tpl.metadata.as_ref();
    if !subset(e_meta.and_then(|m| m.labels.as_ref()), o_meta.and_then(|m| m.labels.as_ref()))
        || !subset(
            e_meta.and_then(|m| m.annotations.as_ref()),
            o_meta.and_then(|m| m.annotations.as_ref()),
        )
    {
        return Ok(false);
    }

    let (Some(e_pod), Some(o_pod)) = (e_tpl.spec.as_ref(), o_tpl.spec.as_ref()) else {
        return Ok(false);
    };
    if e_pod.containers.len() != o_pod.containers.len() || e_pod.containers.is_empty() {
        return Ok(false);
    }

    let e_main = &e_pod.containers[0];
    let o_main = &o_pod.containers[0];
    let e_image = e_main.image.as_deref().unwrap_or_default();
    let o_image = o_main.image.as_deref().unwrap_or_default();
    if image_tag(e_image) != image_tag(o_image) {
        return Ok(false);
    }
    if canonical(e_main.resources.as_ref())? != canonical(o_main.resources.as_ref())? {
        return Ok(false);
    }
    if canonical(e_pod.affinity.as_ref())? != canonical(o_pod.affinity.as_ref())? {
        return Ok(false);
    }
    // environment is compared as a map, the API server may reorder it
    if env_map(e_main.env.as_ref())? != env_map(o_main.env.as_ref())? {
        return Ok(false);
    }

    for (e, o) in e_pod.containers.iter().zip(&o_pod.containers).skip(1) {
        if !is_derivative(&to_value(e)?, &to_value(o)?) {
            return Ok(false);
        }
    }

    let mut e_pod_rest = e_pod.clone();
    let mut o_pod_rest = o_pod.clone();
    for pod in [&mut e_pod_rest, &mut o_pod_rest] {
        pod.containers.clear();
        pod.affinity = None;
    }
    let mut e_main_rest = e_main.clone();
    let mut o_main_rest = o_main.clone();
    for c in [&mut e_main_rest, &mut o_main_rest] {
        c.image = None;
        c.env = None;
        c.resources = None;
    }
    Ok(is_derivative(&to_value(&e_pod_rest)?, &to_value(&o_pod_rest)?)
        && is_derivative(&to_value(&e_main_rest)?, &to_value(&o_main_rest)?))
}

/// Whether any other managed StatefulSet (KES, Prometheus, log) still matches.
pub fn statefulset_matches(
    expected: &v1::StatefulSet,
    observed: &v1::StatefulSet,
) -> Result<bool, types::error::Error> {
    let (Some(e_spec), Some(o_spec)) = (expected.spec.as_ref(), observed.spec.as_ref()) else {
        return Ok(false);
    };
    if e_spec.replicas != o_spec.replicas {
        return Ok(false);
    }
    let (Some(e_pod), Some(o_pod)) = (e_spec.template.spec.as_ref(), o_spec.template.spec.as_ref()) else {
        return Ok(false);
    };
    if e_pod.containers.len() != o_pod.containers.len() {
        return Ok(false);
    }
    for (e, o) in e_pod.containers.iter().zip(&o_pod.containers) {
        if env_map(e.env.as_ref())? != env_map(o.env.as_ref())? {
            return Ok(false);
        }
        let mut e = e.clone();
        let mut o = o.clone();
        e.env = None;
        o.env = None;
        if !is_derivative(&to_value(&e)?, &to_value(&o)?) {
            return Ok(false);
        }
    }
    let mut e_pod = e_pod.clone();
    let mut o_pod = o_pod.clone();
    e_pod.containers.clear();
    o_pod.containers.clear();
    Ok(is_derivative(&to_value(&e_pod)?, &to_value(&o_pod)?))
}

/// Copies the freshly built spec into `observed`, keeping the immutable
/// selector and volume claims plus the v1 `zone` pod label.
pub fn merge_statefulset(observed: &mut v1::StatefulSet, expected: &v1::StatefulSet) {
    let Some(expected_spec) = expected.spec.as_ref() else {
        return;
    };
    let legacy_zone = observed
        .spec
        .as_ref()
        .and_then(|s| s.template.metadata.as_ref())
        .and_then(|m| m.labels.as_ref())
        .and_then(|l| l.get(LEGACY_ZONE_LABEL))
        .cloned();

    let spec = observed.spec.get_or_insert_with(Default::default);
    spec.replicas = expected_spec.replicas;
    spec.template = expected_spec.template.clone();
    spec.update_strategy = expected_spec.update_strategy.clone();

    if let Some(zone) = legacy_zone {
        spec.template
            .metadata
            .get_or_insert_with(Default::default)
            .labels
            .get_or_insert_with(Default::default)
            .insert(LEGACY_ZONE_LABEL.to_owned(), zone);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::OperatorConfig;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn pool_ss() -> v1::StatefulSet {
        crate::tests::create_test_tenant()
            .new_pool_statefulset(0, &OperatorConfig::default(), &BTreeSet::new())
            .unwrap()
    }

    fn main_container(ss: &mut v1::StatefulSet) -> &mut corev1::Container {
        &mut ss
            .spec
            .as_mut()
            .unwrap()
            .template
            .spec
            .as_mut()
            .unwrap()
            .containers[0]
    }

    #[test]
    fn test_is_derivative() {
        assert!(is_derivative(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
        assert!(!is_derivative(&json!({"a": 1}), &json!({"a": 2})));
        assert!(is_derivative(&json!({"a": []}), &json!({})));
        assert!(!is_derivative(&json!([1, 2]), &json!([1, 2, 3])));
        assert!(is_derivative(
            &json!([{"name": "x"}]),
            &json!([{"name": "x", "terminationMessagePath": "/dev/termination-log"}])
        ));
    }

    #[test]
    fn test_image_tag() {
        assert_eq!(image_tag("minio/minio:RELEASE.2021-06-07T21-40-51Z"), "RELEASE.2021-06-07T21-40-51Z");
        assert_eq!(image_tag("registry:5000/minio/minio"), "latest");
        assert_eq!(image_tag("store:v2@sha256:abc"), "v2");
    }

    #[test]
    fn test_pool_statefulset_matches_itself() {
        let expected = pool_ss();
        assert!(pool_statefulset_matches(&expected, &expected.clone()).unwrap());
    }

    #[test]
    fn test_pool_statefulset_tolerates_server_defaults() {
        let expected = pool_ss();
        let mut observed = expected.clone();
        let container = main_container(&mut observed);
        container.termination_message_path = Some("/dev/termination-log".to_owned());
        if let Some(env) = container.env.as_mut() {
            env.reverse();
        }
        observed
            .spec
            .as_mut()
            .unwrap()
            .template
            .spec
            .as_mut()
            .unwrap()
            .dns_policy = Some("ClusterFirst".to_owned());
        assert!(pool_statefulset_matches(&expected, &observed).unwrap());
    }

    #[test]
    fn test_pool_statefulset_detects_image_change() {
        let expected = pool_ss();
        let mut observed = expected.clone();
        main_container(&mut observed).image = Some("minio/minio:RELEASE.2020-01-01T00-00-00Z".to_owned());
        assert!(!pool_statefulset_matches(&expected, &observed).unwrap());
    }

    #[test]
    fn test_pool_statefulset_detects_env_change() {
        let expected = pool_ss();
        let mut observed = expected.clone();
        if let Some(env) = main_container(&mut observed).env.as_mut() {
            env.pop();
        }
        assert!(!pool_statefulset_matches(&expected, &observed).unwrap());
    }

    #[test]
    fn test_merge_keeps_zone_label() {
        let expected = pool_ss();
        let mut observed = expected.clone();
        observed
            .spec
            .as_mut()
            .unwrap()
            .template
            .metadata
            .as_mut()
            .unwrap()
            .labels
            .as_mut()
            .unwrap()
            .insert(LEGACY_ZONE_LABEL.to_owned(), "zone-0".to_owned());
        main_container(&mut observed).image = Some("old:tag".to_owned());

        merge_statefulset(&mut observed, &expected);
        let labels = observed.spec.as_ref().unwrap().template.metadata.as_ref().unwrap().labels.clone().unwrap();
        assert_eq!(labels.get(LEGACY_ZONE_LABEL).unwrap(), "zone-0");
        assert!(pool_statefulset_matches(&expected, &observed).unwrap());
    }
}
