use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Node;
use kube::Api;
use kube::Client;

use super::KubernetesError;
use crate::domain::reconcile::NodeIdentity;

/// Resolves the name and uid of the node the agent runs on.
pub async fn fetch_node_identity(
    client: Client,
    node_name: &str,
) -> Result<NodeIdentity, Report<KubernetesError>> {
    let nodes: Api<Node> = Api::all(client);
    let node = nodes
        .get(node_name)
        .await
        .change_context(KubernetesError::NodeLookupFailed {
            node_name: node_name.to_string(),
            message: "failed to get node".to_string(),
        })?;

    let uid = node.metadata.uid.ok_or_else(|| {
        Report::new(KubernetesError::NodeLookupFailed {
            node_name: node_name.to_string(),
            message: "node has no uid".to_string(),
        })
    })?;

    Ok(NodeIdentity {
        name: node_name.to_string(),
        uid,
    })
}
