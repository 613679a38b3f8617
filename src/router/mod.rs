//! Accepts datagrams and stream connections, resolves targets by
//! longest path/alias prefix, and delivers events into Nodes (§4.G).
//! Polled non-blockingly once per host-loop tick; no async runtime
//! (§4.G.1) — the render/event loop stays on its one cooperative thread.

pub mod datagram;
pub mod stream;

use std::net::{TcpListener, UdpSocket};

use rustc_hash::FxHashMap;

use crate::capabilities::{self, HostCtx};
use crate::errors::{BeamerError, Result};
use crate::tree::node::SubscriberId;
use crate::tree::{NodeHandle, ProfileBin, Tree};
use datagram::DatagramOutcome;
use stream::Client;

/// Default port for both the datagram and stream listeners (§6).
pub const DEFAULT_PORT: u16 = 4444;

pub struct Router {
    udp: UdpSocket,
    tcp: TcpListener,
    clients: FxHashMap<SubscriberId, Client>,
    next_subscriber: SubscriberId,
    pid: u32,
}

impl Router {
    pub fn bind(port: u16) -> Result<Self> {
        let udp = UdpSocket::bind(("0.0.0.0", port))?;
        udp.set_nonblocking(true)?;
        let tcp = TcpListener::bind(("0.0.0.0", port))?;
        tcp.set_nonblocking(true)?;
        log::info!("router listening on :{port} (udp+tcp)");
        Ok(Self {
            udp,
            tcp,
            clients: FxHashMap::default(),
            next_subscriber: 0,
            pid: std::process::id(),
        })
    }

    /// One tick: accept new connections, drain pending datagrams and
    /// client lines, deliver resolved events, then flush every client's
    /// write queue and fan out any pending node output (§4.H step 3).
    pub fn poll(&mut self, tree: &mut Tree, ctx: &mut HostCtx, now: f64) {
        self.accept_new_clients();
        self.drain_datagrams(tree, ctx, now);
        self.drain_client_lines(tree, ctx, now);
        self.fan_out_node_output(tree);
        for client in self.clients.values_mut() {
            client.flush();
        }
        self.clients.retain(|_, c| !is_dead(c));
    }

    fn accept_new_clients(&mut self) {
        loop {
            match self.tcp.accept() {
                Ok((socket, _addr)) => match Client::new(socket, self.pid) {
                    Ok(client) => {
                        let id = self.next_subscriber;
                        self.next_subscriber += 1;
                        self.clients.insert(id, client);
                    }
                    Err(err) => log::warn!("router: failed to accept client: {err}"),
                },
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }

    fn drain_datagrams(&mut self, tree: &mut Tree, ctx: &mut HostCtx, now: f64) {
        let mut buf = [0u8; 1500];
        loop {
            let (len, from) = match self.udp.recv_from(&mut buf) {
                Ok(v) => v,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            };
            let reply = match datagram::parse(&buf[..len]) {
                DatagramOutcome::BadFormat => {
                    log::debug!("{}", BeamerError::MalformedDatagram);
                    Some(datagram::REPLY_FMT)
                }
                DatagramOutcome::NegativeLength => {
                    log::debug!("{}", BeamerError::NegativePayloadLength);
                    Some(datagram::REPLY_WTF)
                }
                DatagramOutcome::Parsed(parsed) => {
                    match resolve(tree, &parsed.address) {
                        Some((handle, suffix)) => {
                            deliver_raw_data(tree, ctx, handle, now, parsed.data, parsed.is_osc, suffix);
                            None
                        }
                        None => {
                            log::debug!("{}", BeamerError::AddressNotFound(parsed.address.clone()));
                            Some(datagram::REPLY_404)
                        }
                    }
                }
            };
            if let Some(token) = reply {
                let _ = self.udp.send_to(token, from);
            }
        }
    }

    fn drain_client_lines(&mut self, tree: &mut Tree, ctx: &mut HostCtx, now: f64) {
        let ids: Vec<SubscriberId> = self.clients.keys().copied().collect();
        for id in ids {
            let lines = {
                let Some(client) = self.clients.get_mut(&id) else {
                    continue;
                };
                client.read_lines()
            };
            for line in lines {
                self.handle_client_line(tree, ctx, now, id, line);
            }
        }
    }

    fn handle_client_line(
        &mut self,
        tree: &mut Tree,
        ctx: &mut HostCtx,
        now: f64,
        id: SubscriberId,
        line: String,
    ) {
        let already_linked = self.clients.get(&id).and_then(|c| c.linked);
        match already_linked {
            Some(handle) => {
                deliver_input(tree, ctx, handle, now, line);
            }
            None => match resolve_exact(tree, &line) {
                Some(handle) => {
                    if let Some(node) = tree.get_mut(handle) {
                        node.subscribers.push(id);
                    }
                    if let Some(client) = self.clients.get_mut(&id) {
                        client.linked = Some(handle);
                        client.queue_write(b"ok!\n");
                    }
                }
                None => {
                    log::debug!("{}", BeamerError::AddressNotFound(line.clone()));
                    if let Some(client) = self.clients.get_mut(&id) {
                        client.queue_write(b"404\n");
                    }
                }
            },
        }
    }

    fn fan_out_node_output(&mut self, tree: &mut Tree) {
        let mut per_node_lines: Vec<(NodeHandle, Vec<String>)> = Vec::new();
        tree.walk(|handle, node| {
            if !node.pending_output.is_empty() {
                per_node_lines.push((handle, node.pending_output.iter().cloned().collect()));
            }
        });
        for (handle, _) in &per_node_lines {
            if let Some(node) = tree.get_mut(*handle) {
                node.pending_output.clear();
            }
        }
        for (handle, lines) in per_node_lines {
            for (_, client) in self.clients.iter_mut() {
                if client.linked == Some(handle) {
                    for line in &lines {
                        client.queue_write(line.as_bytes());
                        client.queue_write(b"\n");
                    }
                }
            }
        }
    }
}

// TODO: wire actual disconnect detection (a 0-byte read distinct from
// WouldBlock) through to here so closed sockets are evicted.
fn is_dead(client: &Client) -> bool {
    let _ = client;
    false
}

/// Longest-prefix resolution over the exact address only (no suffix),
/// used by the stream protocol's subscribe line (§4.G).
fn resolve_exact(tree: &Tree, address: &str) -> Option<NodeHandle> {
    tree.find_by_path_or_alias(address)
}

/// Longest-prefix resolution for datagram addressing: try the full
/// address, then strip trailing `/`-segments into an accumulated
/// `suffix` until a Node matches or nothing is left to strip (§4.G).
fn resolve(tree: &Tree, address: &str) -> Option<(NodeHandle, String)> {
    if let Some(handle) = tree.find_by_path_or_alias(address) {
        return Some((handle, String::new()));
    }
    let mut head = address;
    let mut suffix = String::new();
    while let Some(idx) = head.rfind('/') {
        let stripped_tail = &head[idx + 1..];
        suffix = if suffix.is_empty() {
            stripped_tail.to_string()
        } else {
            format!("{stripped_tail}/{suffix}")
        };
        head = &head[..idx];
        if let Some(handle) = tree.find_by_path_or_alias(head) {
            return Some((handle, suffix));
        }
    }
    None
}

fn deliver_raw_data(
    tree: &mut Tree,
    ctx: &mut HostCtx,
    handle: NodeHandle,
    now: f64,
    data: Vec<u8>,
    is_osc: bool,
    suffix: String,
) {
    capabilities::dispatch_event(tree, ctx, handle, now, ProfileBin::Event, move |lua| {
        let globals = lua.globals();
        if let Ok(f) = globals.get::<mlua::Function>("on_raw_data") {
            f.call::<()>((data.clone(), is_osc, suffix.clone()))?;
        }
        Ok(())
    });
}

fn deliver_input(tree: &mut Tree, ctx: &mut HostCtx, handle: NodeHandle, now: f64, line: String) {
    capabilities::dispatch_event(tree, ctx, handle, now, ProfileBin::Event, move |lua| {
        let globals = lua.globals();
        if let Ok(f) = globals.get::<mlua::Function>("on_input") {
            f.call::<()>(line.clone())?;
        }
        Ok(())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn new_tree() -> Tree {
        Tree::new("root".to_string(), PathBuf::from("/root"))
    }

    #[test]
    fn resolve_exact_address_matches_directly() {
        let mut tree = new_tree();
        let root = tree.root();
        let child = tree
            .insert_child(root, "a".to_string(), PathBuf::from("/root/a"))
            .unwrap();
        assert_eq!(resolve(&tree, "root/a"), Some((child, String::new())));
    }

    #[test]
    fn resolve_falls_back_to_longest_existing_prefix() {
        let mut tree = new_tree();
        let root = tree.root();
        let a = tree
            .insert_child(root, "a".to_string(), PathBuf::from("/root/a"))
            .unwrap();
        let (handle, suffix) = resolve(&tree, "root/a/b/c").unwrap();
        assert_eq!(handle, a);
        assert_eq!(suffix, "b/c");
    }

    #[test]
    fn resolve_fails_when_nothing_matches() {
        let tree = new_tree();
        assert!(resolve(&tree, "nope/nothing").is_none());
    }
}
