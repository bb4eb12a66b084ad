//! Operator authentication middleware for Actix Web.
//!
//! Every route under the admin scope is wrapped with this middleware. A request must present the
//! configured operator token in the [`ADMIN_TOKEN_HEADER`] header, and, when a whitelist is
//! configured, must originate from one of the whitelisted addresses.
//!
//! A server that starts without `BPG_ADMIN_TOKEN` keeps the admin scope mounted but this
//! middleware rejects every call to it.

use std::{
    future::{ready, Ready},
    net::IpAddr,
    rc::Rc,
};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::{ErrorForbidden, ErrorUnauthorized},
    Error,
};
use bpg_common::{signature::constant_time_eq, Secret};
use futures::future::LocalBoxFuture;
use log::{trace, warn};

use crate::{helpers::get_remote_ip, middleware::ADMIN_TOKEN_HEADER};

pub struct AdminMiddlewareFactory {
    token: Secret<String>,
    whitelist: Option<Vec<IpAddr>>,
    use_x_forwarded_for: bool,
    use_forwarded: bool,
}

impl AdminMiddlewareFactory {
    pub fn new(
        token: Secret<String>,
        whitelist: Option<Vec<IpAddr>>,
        use_x_forwarded_for: bool,
        use_forwarded: bool,
    ) -> Self {
        AdminMiddlewareFactory { token, whitelist, use_x_forwarded_for, use_forwarded }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AdminMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = AdminMiddlewareService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AdminMiddlewareService {
            token: self.token.clone(),
            whitelist: self.whitelist.clone(),
            use_x_forwarded_for: self.use_x_forwarded_for,
            use_forwarded: self.use_forwarded,
            service: Rc::new(service),
        }))
    }
}

pub struct AdminMiddlewareService<S> {
    token: Secret<String>,
    whitelist: Option<Vec<IpAddr>>,
    use_x_forwarded_for: bool,
    use_forwarded: bool,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for AdminMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;
    type Response = ServiceResponse<B>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let token = self.token.reveal().clone();
        let whitelist = self.whitelist.clone();
        let use_x_forwarded_for = self.use_x_forwarded_for;
        let use_forwarded = self.use_forwarded;
        Box::pin(async move {
            trace!("🔐️ Checking operator credentials for request");
            if token.is_empty() {
                warn!("🔐️ Admin call received but no admin token is configured. Denying access.");
                return Err(ErrorUnauthorized("Admin access is not configured."));
            }
            let presented = req.headers().get(ADMIN_TOKEN_HEADER).and_then(|v| v.to_str().ok()).ok_or_else(|| {
                warn!("🔐️ No operator token found in request. Denying access.");
                ErrorUnauthorized("No operator token found.")
            })?;
            if !constant_time_eq(presented.as_bytes(), token.as_bytes()) {
                warn!("🔐️ Invalid operator token presented. Denying access.");
                return Err(ErrorUnauthorized("Invalid operator token."));
            }
            if let Some(whitelist) = whitelist {
                let peer = get_remote_ip(req.request(), use_x_forwarded_for, use_forwarded);
                match peer {
                    Some(ip) if whitelist.contains(&ip) => {
                        trace!("🔐️ Operator address {ip} is whitelisted");
                    },
                    Some(ip) => {
                        warn!("🔐️ Operator address {ip} is not on the admin whitelist. Denying access.");
                        return Err(ErrorForbidden("Access denied."));
                    },
                    None => {
                        warn!("🔐️ Could not determine the peer address for an admin call. Denying access.");
                        return Err(ErrorForbidden("Access denied."));
                    },
                }
            }
            trace!("🔐️ Operator credential check ✅️");
            service.call(req).await
        })
    }
}
