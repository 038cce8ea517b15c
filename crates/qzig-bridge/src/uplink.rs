//! Tree notifications sent over the RPC connection

use qzig_core::Uplink;
use qzig_rpc::RpcClient;
use serde_json::Value as JsonValue;

/// [`Uplink`] backed by an [`RpcClient`]
#[derive(Clone)]
pub struct RpcUplink(RpcClient);

impl RpcUplink {
    pub fn new(client: RpcClient) -> Self {
        Self(client)
    }

    pub fn client(&self) -> &RpcClient {
        &self.0
    }
}

impl Uplink for RpcUplink {
    fn post(&self, url: &str, data: JsonValue) {
        tracing::debug!(url, "POST");
        self.0.post(url, data);
    }

    fn put(&self, url: &str, data: JsonValue) {
        tracing::debug!(url, "PUT");
        self.0.put(url, data);
    }

    fn delete(&self, url: &str) {
        tracing::debug!(url, "DELETE");
        self.0.delete(url);
    }
}
