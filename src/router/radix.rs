//! Radix tree for route matching
//!
//! Paths are split into segments; static segments match exactly and parameter
//! segments (`:id` or `{id}`) match any single segment. Lookup is O(k) in the
//! number of segments, independent of how many routes are mounted.
//!
//! Each terminal node stores its routes per HTTP method, plus an optional
//! any-method route used for endpoints such as logout.

use http::Method;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use super::{ParamVec, Route};

#[derive(Clone, Default)]
struct RadixNode {
    segment: Cow<'static, str>,
    routes: HashMap<Method, Arc<Route>>,
    any_method: Option<Arc<Route>>,
    param_name: Option<Arc<str>>,
    children: Vec<RadixNode>,
    /// Parameter children; several are kept when routes name the same position differently
    param_children: Vec<RadixNode>,
}

/// Parameter name of a `:name` or `{name}` segment.
pub(crate) fn param_name(segment: &str) -> Option<&str> {
    if let Some(name) = segment.strip_prefix(':') {
        return Some(name).filter(|n| !n.is_empty());
    }
    segment
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .filter(|n| !n.is_empty())
}

pub(crate) fn segments(path: &str) -> Vec<&str> {
    path.trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}

impl RadixNode {
    fn new(segment: &str) -> Self {
        Self {
            segment: Cow::Owned(segment.to_string()),
            ..Default::default()
        }
    }

    fn new_param(name: &str) -> Self {
        Self {
            param_name: Some(Arc::from(name)),
            ..Default::default()
        }
    }

    /// Insert a route; returns the route it replaced, if any.
    fn insert(&mut self, segments: &[&str], route: Arc<Route>) -> Option<Arc<Route>> {
        let Some((&segment, remaining)) = segments.split_first() else {
            return match route.method.clone() {
                Some(method) => self.routes.insert(method, route),
                None => self.any_method.replace(route),
            };
        };

        if let Some(name) = param_name(segment) {
            if let Some(child) = self
                .param_children
                .iter_mut()
                .find(|c| c.param_name.as_deref() == Some(name))
            {
                return child.insert(remaining, route);
            }
            let mut child = RadixNode::new_param(name);
            let replaced = child.insert(remaining, route);
            self.param_children.push(child);
            return replaced;
        }

        if let Some(child) = self.children.iter_mut().find(|c| c.segment == segment) {
            return child.insert(remaining, route);
        }
        let mut child = RadixNode::new(segment);
        let replaced = child.insert(remaining, route);
        self.children.push(child);
        replaced
    }

    fn search(&self, segments: &[&str], method: &Method, params: &mut ParamVec) -> Option<Arc<Route>> {
        let Some((&segment, remaining)) = segments.split_first() else {
            return self
                .routes
                .get(method)
                .or(self.any_method.as_ref())
                .cloned();
        };

        for child in &self.children {
            if child.segment == segment {
                if let Some(route) = child.search(remaining, method, params) {
                    return Some(route);
                }
            }
        }

        for child in &self.param_children {
            if let Some(name) = &child.param_name {
                let value = urlencoding::decode(segment)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| segment.to_string());
                params.push((Arc::clone(name), value));
                if let Some(route) = child.search(remaining, method, params) {
                    return Some(route);
                }
                // Backtrack
                params.pop();
            }
        }

        None
    }
}

/// Radix tree router.
#[derive(Clone, Default)]
pub struct RadixRouter {
    root: RadixNode,
}

impl RadixRouter {
    pub fn insert(&mut self, route: Arc<Route>) -> Option<Arc<Route>> {
        let pattern = route.pattern.clone();
        self.root.insert(&segments(&pattern), route)
    }

    pub fn route(&self, method: &Method, path: &str) -> Option<(Arc<Route>, ParamVec)> {
        let mut params = ParamVec::new();
        let route = self.root.search(&segments(path), method, &mut params)?;
        Some((route, params))
    }
}
