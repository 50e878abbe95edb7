//! Call interception
//!
//! Wraps an operation so that it runs with a routing key on top of the
//! routing context. Keys are attached to call sites explicitly through a
//! [`RouteTable`] (method-level keys win over type-level keys), or passed in
//! directly with [`CallInterceptor::invoke_with_key`]. Call sites without an
//! attached key run unchanged and see their caller's key.

use std::any::TypeId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::context;
use crate::resolver::{Invocation, ResolverChain, is_dynamic};

/// Identity of a call site: concrete type plus method name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSite {
    type_id: TypeId,
    type_name: &'static str,
    method: &'static str,
}

impl CallSite {
    pub fn of<T: ?Sized + 'static>(method: &'static str) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            method,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn method(&self) -> &'static str {
        self.method
    }
}

/// Routing keys attached to types and methods
#[derive(Debug, Default)]
pub struct RouteTable {
    type_keys: HashMap<TypeId, String>,
    method_keys: HashMap<(TypeId, &'static str), String>,
    cache: RwLock<HashMap<CallSite, Option<Arc<str>>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for every method of `T` without a key of its own
    pub fn annotate_type<T: ?Sized + 'static>(mut self, key: impl Into<String>) -> Self {
        self.type_keys.insert(TypeId::of::<T>(), key.into());
        self
    }

    /// Key for one method of `T`
    pub fn annotate_method<T: ?Sized + 'static>(
        mut self,
        method: &'static str,
        key: impl Into<String>,
    ) -> Self {
        self.method_keys
            .insert((TypeId::of::<T>(), method), key.into());
        self
    }

    /// Literal key attached to `site`, `None` when nothing is attached
    ///
    /// Attached keys never change, so the lookup is computed once per site.
    pub fn find_key(&self, site: &CallSite) -> Option<Arc<str>> {
        if let Some(key) = self.cache.read().get(site) {
            return key.clone();
        }

        let key: Option<Arc<str>> = self
            .method_keys
            .get(&(site.type_id, site.method))
            .or_else(|| self.type_keys.get(&site.type_id))
            .map(|key| Arc::from(key.as_str()));

        self.cache.write().insert(*site, key.clone());
        key
    }

    pub fn cached_sites(&self) -> usize {
        self.cache.read().len()
    }
}

/// Computes the routing key for a call and scopes the call with it
#[derive(Debug)]
pub struct CallInterceptor {
    routes: RouteTable,
    chain: ResolverChain,
}

impl CallInterceptor {
    pub fn new(routes: RouteTable, chain: ResolverChain) -> Self {
        Self { routes, chain }
    }

    /// No attached routes, standard resolver chain
    pub fn standard() -> Self {
        Self::new(RouteTable::new(), ResolverChain::standard())
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Effective routing key for `literal`
    ///
    /// Literal keys are used verbatim. Dynamic keys go through the resolver
    /// chain; when nothing resolves them the call routes to primary (`""`).
    pub fn determine_key(&self, literal: &str, invocation: &Invocation) -> String {
        if !is_dynamic(literal) {
            return literal.to_string();
        }
        match self.chain.resolve(invocation, literal) {
            Some(key) => key,
            None => {
                tracing::debug!(
                    key = literal,
                    method = invocation.method(),
                    "Dynamic routing key did not resolve, using primary"
                );
                String::new()
            }
        }
    }

    /// Effective routing key for a call site, `None` when no key is attached
    pub fn key_for(&self, site: &CallSite, invocation: &Invocation) -> Option<String> {
        self.routes
            .find_key(site)
            .map(|literal| self.determine_key(&literal, invocation))
    }

    /// Run `operation` routed by the key attached to `site`
    ///
    /// Without an attached key the operation runs in the caller's routing
    /// scope.
    pub async fn invoke<F>(&self, site: &CallSite, invocation: &Invocation, operation: F) -> F::Output
    where
        F: Future,
    {
        let Some(key) = self.key_for(site, invocation) else {
            return operation.await;
        };
        tracing::trace!(
            target_type = site.type_name(),
            method = site.method(),
            key = %key,
            "Routing call"
        );
        context::scope(key, operation).await
    }

    /// Run `operation` routed by a key given at the call boundary
    pub async fn invoke_with_key<F>(
        &self,
        literal: &str,
        invocation: &Invocation,
        operation: F,
    ) -> F::Output
    where
        F: Future,
    {
        let key = self.determine_key(literal, invocation);
        context::scope(key, operation).await
    }

    /// Synchronous variant of [`invoke`](Self::invoke)
    pub fn invoke_blocking<R>(
        &self,
        site: &CallSite,
        invocation: &Invocation,
        operation: impl FnOnce() -> R,
    ) -> R {
        match self.key_for(site, invocation) {
            Some(key) => context::sync_scope(key, operation),
            None => operation(),
        }
    }
}

impl Default for CallInterceptor {
    fn default() -> Self {
        Self::standard()
    }
}
