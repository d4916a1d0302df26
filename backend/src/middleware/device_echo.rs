//! Device-id echo middleware.
//!
//! The identity gate adopts (or mints) a device id per request; clients must
//! persist the adopted id. The gate stores it in request extensions and this
//! middleware copies it into the `x-device-id` response header.

use std::task::{Context, Poll};

use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::{Error, HttpMessage};
use futures_util::future::{ready, LocalBoxFuture, Ready};

use crate::domain::DeviceId;

/// Header carrying the client device id in both directions.
pub const DEVICE_ID_HEADER: &str = "x-device-id";

/// Adopted device id stored in request extensions by the gate.
#[derive(Debug, Clone, Copy)]
pub struct EchoDeviceId(pub DeviceId);

/// Middleware echoing the adopted device id on every gated response.
#[derive(Clone)]
pub struct DeviceEcho;

impl<S, B> Transform<S, ServiceRequest> for DeviceEcho
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = DeviceEchoMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(DeviceEchoMiddleware { service }))
    }
}

/// Service wrapper produced by [`DeviceEcho`].
pub struct DeviceEchoMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for DeviceEchoMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let fut = self.service.call(req);
        Box::pin(async move {
            let mut res = fut.await?;
            let adopted = res.request().extensions().get::<EchoDeviceId>().copied();
            if let Some(EchoDeviceId(device_id)) = adopted {
                if let Ok(value) = HeaderValue::from_str(&device_id.to_string()) {
                    res.response_mut()
                        .headers_mut()
                        .insert(HeaderName::from_static(DEVICE_ID_HEADER), value);
                }
            }
            Ok(res)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App, HttpRequest, HttpResponse};

    #[actix_web::test]
    async fn echoes_adopted_device_id() {
        let app = test::init_service(App::new().wrap(DeviceEcho).route(
            "/",
            web::get().to(|req: HttpRequest| async move {
                let minted = DeviceId::mint();
                req.extensions_mut().insert(EchoDeviceId(minted));
                HttpResponse::Ok().body(minted.to_string())
            }),
        ))
        .await;
        let res = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        let header = res
            .headers()
            .get(DEVICE_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = test::read_body(res).await;
        assert_eq!(header.as_deref(), Some(std::str::from_utf8(&body).expect("utf8")));
    }

    #[actix_web::test]
    async fn no_header_without_gate() {
        let app = test::init_service(
            App::new()
                .wrap(DeviceEcho)
                .route("/", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;
        let res = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert!(!res.headers().contains_key(DEVICE_ID_HEADER));
    }
}
