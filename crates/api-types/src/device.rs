use std::borrow::Cow;
use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ClusterResourceScope;
use serde::Deserialize;
use serde::Serialize;

use crate::quantity;

/// GPU compute share, counted out of 100 per device.
pub const GPU_CORE: &str = "koordinator.sh/gpu-core";
/// Total device memory in bytes.
pub const GPU_MEMORY: &str = "koordinator.sh/gpu-memory";
/// GPU memory share, counted out of 100 per device.
pub const GPU_MEMORY_RATIO: &str = "koordinator.sh/gpu-memory-ratio";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Gpu,
}

/// One physical device as reported in the node inventory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Stable hardware identifier, unique within a node
    pub uuid: String,
    /// Device minor number, used as the ordering key
    pub minor: i32,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub health: bool,
    #[serde(default)]
    pub resources: BTreeMap<String, Quantity>,
}

impl DeviceInfo {
    /// Compares two records treating resource quantities by value, so `16G`
    /// and `16000000000` are equal.
    pub fn semantic_eq(&self, other: &DeviceInfo) -> bool {
        self.uuid == other.uuid
            && self.minor == other.minor
            && self.device_type == other.device_type
            && self.health == other.health
            && self.resources.len() == other.resources.len()
            && self.resources.iter().all(|(name, value)| {
                other
                    .resources
                    .get(name)
                    .is_some_and(|o| quantity::quantities_equal(value, o))
            })
    }

    /// Sorts devices by minor number, the canonical order of `spec.devices`.
    pub fn sort_by_minor(devices: &mut [DeviceInfo]) {
        devices.sort_by_key(|d| d.minor);
    }

    /// Element-wise [`DeviceInfo::semantic_eq`] over two lists in their given order.
    pub fn lists_semantically_equal(a: &[DeviceInfo], b: &[DeviceInfo]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.semantic_eq(y))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSpec {
    #[serde(default)]
    pub devices: Vec<DeviceInfo>,
}

const API_VERSION: &str = "scheduling.koordinator.sh/v1alpha1";
const KIND: &str = "Device";

/// Device custom resource, one per node, named after the node
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: DeviceSpec,
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    KIND.to_string()
}

impl Device {
    pub fn new(metadata: ObjectMeta, spec: DeviceSpec) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata,
            spec,
        }
    }
}

impl kube::Resource for Device {
    type DynamicType = ();
    type Scope = ClusterResourceScope;

    fn group(_dt: &()) -> Cow<'_, str> {
        "scheduling.koordinator.sh".into()
    }

    fn version(_dt: &()) -> Cow<'_, str> {
        "v1alpha1".into()
    }

    fn kind(_dt: &()) -> Cow<'_, str> {
        KIND.into()
    }

    fn plural(_dt: &()) -> Cow<'_, str> {
        "devices".into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
