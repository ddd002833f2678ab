//! Entry point tying an engine to a configuration.

use std::sync::Arc;

use crate::closure_graph::ClosureGraphBuilder;
use crate::config::GraphConfig;
use crate::edge_graph::EdgeGraphBuilder;
use crate::engine::GraphEngine;

/// Hands out builders that share one engine and configuration.
///
/// Builders are single-owner; create one per graph under construction.
/// Compiled groups and plans keep their own reference to the engine, so the
/// context may be dropped while they are still in use.
pub struct GraphContext<E: GraphEngine> {
    engine: Arc<E>,
    config: GraphConfig,
}

impl<E: GraphEngine> GraphContext<E> {
    /// Context with the default configuration.
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, GraphConfig::default())
    }

    /// Context with an explicit configuration.
    pub fn with_config(engine: E, config: GraphConfig) -> Self {
        Self {
            engine: Arc::new(engine),
            config,
        }
    }

    /// Context around an engine that is shared elsewhere.
    pub fn from_shared(engine: Arc<E>, config: GraphConfig) -> Self {
        Self { engine, config }
    }

    /// A new edge-graph builder.
    pub fn edge_builder(&self) -> EdgeGraphBuilder<E> {
        EdgeGraphBuilder::new(Arc::clone(&self.engine), self.config.clone())
    }

    /// A new closure-graph builder.
    pub fn closure_builder(&self) -> ClosureGraphBuilder<E> {
        ClosureGraphBuilder::new(Arc::clone(&self.engine), self.config.clone())
    }

    /// The engine.
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// The configuration builders are created with.
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }
}
