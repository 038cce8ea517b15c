//! Inbound request handling

use async_trait::async_trait;

use crate::frame::{Method, RequestParams};

/// `Ok` is answered with `result: true`, `Err` with an error object
/// carrying the message
pub type HandlerResult = Result<(), String>;

/// Application side of the connection
///
/// Each method receives the named parameters of one inbound request.
/// Methods the application does not implement are refused.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn get(&self, params: RequestParams) -> HandlerResult {
        let _ = params;
        Err(unsupported(Method::Get))
    }

    async fn put(&self, params: RequestParams) -> HandlerResult {
        let _ = params;
        Err(unsupported(Method::Put))
    }

    async fn post(&self, params: RequestParams) -> HandlerResult {
        let _ = params;
        Err(unsupported(Method::Post))
    }

    async fn delete(&self, params: RequestParams) -> HandlerResult {
        let _ = params;
        Err(unsupported(Method::Delete))
    }
}

fn unsupported(method: Method) -> String {
    format!("{} is not supported", method)
}

pub(crate) async fn dispatch(
    handler: &dyn RequestHandler,
    method: Method,
    params: RequestParams,
) -> HandlerResult {
    match method {
        Method::Get => handler.get(params).await,
        Method::Put => handler.put(params).await,
        Method::Post => handler.post(params).await,
        Method::Delete => handler.delete(params).await,
    }
}
