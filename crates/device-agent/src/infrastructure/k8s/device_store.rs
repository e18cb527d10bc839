use api_types::Device;
use async_trait::async_trait;
use error_stack::Report;
use kube::api::GetParams;
use kube::api::PostParams;
use kube::Api;
use kube::Client;

use crate::domain::reconcile::InventoryStore;
use crate::domain::reconcile::StoreError;

/// [`InventoryStore`] backed by the cluster-scoped `Device` resource.
///
/// Reads use resource version `"0"`, so the API server may answer from its
/// watch cache. Writes carry the read resource version and fail with a
/// conflict when it is stale.
pub struct KubeInventoryStore {
    devices: Api<Device>,
}

impl KubeInventoryStore {
    pub fn new(client: Client) -> Self {
        Self {
            devices: Api::all(client),
        }
    }
}

fn classify(e: &kube::Error) -> StoreError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound,
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            StoreError::AlreadyExists
        }
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict,
        kube::Error::Api(ae) if ae.code == 429 => StoreError::TooManyRequests,
        other => StoreError::Request {
            message: other.to_string(),
        },
    }
}

fn store_error(e: kube::Error) -> Report<StoreError> {
    let context = classify(&e);
    Report::new(e).change_context(context)
}

fn object_name(device: &Device) -> Result<&str, Report<StoreError>> {
    device.metadata.name.as_deref().ok_or_else(|| {
        Report::new(StoreError::Request {
            message: "device object has no name".to_string(),
        })
    })
}

#[async_trait]
impl InventoryStore for KubeInventoryStore {
    async fn get(&self, name: &str) -> Result<Option<Device>, Report<StoreError>> {
        match self.devices.get_with(name, &GetParams::any()).await {
            Ok(device) => Ok(Some(device)),
            Err(e) if classify(&e) == StoreError::NotFound => Ok(None),
            Err(e) => Err(store_error(e)),
        }
    }

    async fn create(&self, device: &Device) -> Result<Device, Report<StoreError>> {
        self.devices
            .create(&PostParams::default(), device)
            .await
            .map_err(store_error)
    }

    async fn update(&self, device: &Device) -> Result<Device, Report<StoreError>> {
        let name = object_name(device)?;
        self.devices
            .replace(name, &PostParams::default(), device)
            .await
            .map_err(store_error)
    }
}

#[cfg(test)]
mod tests {
    use kube::core::ErrorResponse;
    use similar_asserts::assert_eq;

    use super::*;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("request failed with {reason}"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_classify_api_errors() {
        assert_eq!(classify(&api_error(404, "NotFound")), StoreError::NotFound);
        assert_eq!(
            classify(&api_error(409, "AlreadyExists")),
            StoreError::AlreadyExists
        );
        assert_eq!(classify(&api_error(409, "Conflict")), StoreError::Conflict);
        assert_eq!(
            classify(&api_error(429, "TooManyRequests")),
            StoreError::TooManyRequests
        );
        assert!(matches!(
            classify(&api_error(403, "Forbidden")),
            StoreError::Request { .. }
        ));
    }

    #[test]
    fn test_store_error_keeps_classification() {
        let report = store_error(api_error(409, "Conflict"));
        assert!(report.current_context().is_retriable());
    }
}
