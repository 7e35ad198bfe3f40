use std::collections::HashMap;
use std::sync::Arc;
use super::{Node, NodeConfig};
use crate::player::AudioPlayer;
use crate::{Error, Result};

/// A set of nodes keyed by name, with players placed on the least loaded one.
#[derive(Default)]
pub struct NodeManager {
    pub nodes: HashMap<String, Node>,
}

impl NodeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new node to be managed and starts connecting it.
    ///
    /// Fails if a node with the same name is already managed.
    pub fn add_node(&mut self, config: NodeConfig) -> Result<&Node> {
        let node = Node::new(config)?;

        self.insert_node(node)
    }

    /// Adds an already constructed node and starts connecting it.
    pub fn insert_node(&mut self, node: Node) -> Result<&Node> {
        if self.nodes.contains_key(node.name()) {
            return Err(Error::Config("a node with this name is already managed"));
        }

        node.start()?;

        let name = node.name().to_owned();

        Ok(self.nodes.entry(name).or_insert(node))
    }

    /// Determines the best node, if any.
    ///
    /// This does not return the node, but does return its name (keyed in
    /// [`nodes`]). Only connected nodes are considered; nodes that have not
    /// reported stats yet count as idle.
    ///
    /// [`nodes`]: #structfield.nodes
    pub fn best_node(&self) -> Option<&str> {
        let mut record = i32::MAX;
        let mut best = None;

        for (name, node) in &self.nodes {
            if !node.state().is_connected() {
                continue;
            }

            let total = node.penalty().unwrap_or(0);

            if best.is_none() || total < record {
                best = Some(name.as_ref());
                record = total;
            }
        }

        best
    }

    /// Signals a node to close by name.
    ///
    /// Returns whether the node is managed.
    pub fn close(&self, name: &str) -> bool {
        match self.nodes.get(name) {
            Some(node) => {
                node.shutdown();

                true
            },
            None => false,
        }
    }

    /// Removes a node, signalling it to close.
    pub fn remove_node(&mut self, name: &str) -> Option<Node> {
        let node = self.nodes.remove(name)?;
        node.shutdown();

        Some(node)
    }

    /// Closes all of the nodes owned by the manager.
    ///
    /// This is also automatically called when the instance is dropped.
    pub fn close_all(&self) {
        self.nodes.values().for_each(Node::shutdown);
    }

    /// Creates a player on the named node, or on the best node if no name is
    /// given.
    pub async fn create_player(&self, guild_id: u64, node_name: Option<&str>) -> Result<Arc<AudioPlayer>> {
        if let Some(node) = self.player_node(guild_id) {
            debug!("Guild {} already has a player on {}", guild_id, node.name());

            return Err(Error::DuplicateGuild(guild_id));
        }

        let node = match node_name {
            Some(name) => self.nodes.get(name).ok_or(Error::NotConnected)?,
            None => self
                .best_node()
                .and_then(|name| self.nodes.get(name))
                .ok_or(Error::NotConnected)?,
        };

        node.create_player(guild_id).await
    }

    pub fn get_node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// The node hosting the guild's player.
    pub fn player_node(&self, guild_id: u64) -> Option<&Node> {
        self.nodes.values().find(|node| node.players().has(guild_id))
    }
}

impl Drop for NodeManager {
    /// Drops the manager, closing all nodes if possible.
    fn drop(&mut self) {
        self.close_all();
    }
}
