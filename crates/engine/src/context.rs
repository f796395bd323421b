use crate::{Error, Result};
use eval::EvalStats;
use kv::{AsyncIoClients, IoClients};
use models::{EndpointRegistry, ExprTable, ParamTable, PredTable, RequestContext};
use rowset::RowSet;
use std::collections::BTreeMap;

/// Everything a task may read while it runs.
///
/// Executors build one base context per plan execution and clone it per node
/// to attach that node's resolved `NodeRef` inputs.
#[derive(Clone)]
pub struct ExecCtx<'a> {
    pub params: &'a ParamTable,
    pub expr_table: &'a ExprTable,
    pub pred_table: &'a PredTable,
    pub request: Option<&'a RequestContext>,
    pub endpoints: Option<&'a EndpointRegistry>,
    pub io_clients: Option<&'a IoClients>,
    pub async_clients: Option<&'a AsyncIoClients>,
    pub stats: Option<&'a EvalStats>,
    /// RowSets of this node's `NodeRef` params, keyed by param name.
    pub node_refs: BTreeMap<String, RowSet>,
}

impl<'a> ExecCtx<'a> {
    pub fn new(
        params: &'a ParamTable,
        expr_table: &'a ExprTable,
        pred_table: &'a PredTable,
    ) -> Self {
        Self {
            params,
            expr_table,
            pred_table,
            request: None,
            endpoints: None,
            io_clients: None,
            async_clients: None,
            stats: None,
            node_refs: BTreeMap::new(),
        }
    }

    pub fn node_ref(&self, op: &str, name: &str) -> Result<&RowSet> {
        self.node_refs
            .get(name)
            .ok_or_else(|| Error::task(format!("{op}: missing resolved '{name}' NodeRef")))
    }

    pub fn request(&self, op: &str) -> Result<&'a RequestContext> {
        self.request
            .ok_or_else(|| Error::task(format!("{op}: missing request context")))
    }

    pub fn io_clients(&self, op: &str) -> Result<&'a IoClients> {
        self.io_clients
            .ok_or_else(|| Error::task(format!("{op}: no IoClients in context")))
    }

    pub fn async_clients(&self, op: &str) -> Result<&'a AsyncIoClients> {
        self.async_clients
            .ok_or_else(|| Error::task(format!("{op}: no AsyncIoClients in context")))
    }
}
