//! Target resolution.
//!
//! Turns a caller-supplied [`Target`] into the [`ConcreteTarget`] handed to
//! the transport, or rejects the combination before anything is sent. Each
//! role has its own strategy object, chosen once by [`resolver_for`].

use std::collections::HashSet;

use crate::{ConcreteTarget, PeerId, Result, Role, RpcError};

/// Addressing mode for a `call` or `notify`.
///
/// Only meaningful in the server role; a client always talks to its one
/// implicit peer and any target it supplies is ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// A single peer.
    Unicast(PeerId),
    /// Each peer in a non-empty set.
    Multicast(Vec<PeerId>),
    /// Every connected peer. Valid for `notify` only.
    Broadcast,
}

impl Target {
    /// Shorthand for [`Target::Multicast`].
    pub fn many<I, P>(ids: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PeerId>,
    {
        Target::Multicast(ids.into_iter().map(Into::into).collect())
    }
}

impl From<PeerId> for Target {
    fn from(id: PeerId) -> Self {
        Target::Unicast(id)
    }
}

impl From<u32> for Target {
    fn from(id: u32) -> Self {
        Target::Unicast(id.into())
    }
}

impl From<&str> for Target {
    fn from(id: &str) -> Self {
        Target::Unicast(id.into())
    }
}

/// Kind of outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// Expects one value-bearing reply.
    Call,
    /// Expects one acknowledgement.
    Notify,
}

impl std::fmt::Display for CallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallKind::Call => f.write_str("call"),
            CallKind::Notify => f.write_str("notify"),
        }
    }
}

/// Role-specific addressing rules.
pub trait TargetResolver: Send + Sync {
    /// Resolve `target` for an outgoing request named `name`.
    fn resolve(&self, name: &str, kind: CallKind, target: Option<Target>)
        -> Result<ConcreteTarget>;

    /// Where to send the reply to a request received from `sender`.
    fn reply_target(&self, sender: &PeerId) -> ConcreteTarget;
}

/// Client role: one implicit peer, supplied targets are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientResolver;

impl TargetResolver for ClientResolver {
    fn resolve(
        &self,
        _name: &str,
        _kind: CallKind,
        _target: Option<Target>,
    ) -> Result<ConcreteTarget> {
        Ok(ConcreteTarget::Peer)
    }

    fn reply_target(&self, _sender: &PeerId) -> ConcreteTarget {
        ConcreteTarget::Peer
    }
}

/// Server role: a target is required and must be addressable.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServerResolver;

impl TargetResolver for ServerResolver {
    fn resolve(
        &self,
        name: &str,
        kind: CallKind,
        target: Option<Target>,
    ) -> Result<ConcreteTarget> {
        // ---
        let target = target.ok_or_else(|| RpcError::MissingTarget {
            name: name.to_string(),
        })?;

        match target {
            Target::Broadcast => match kind {
                // One reply per request id.
                CallKind::Call => Err(RpcError::BroadcastCallNotSupported {
                    name: name.to_string(),
                }),
                CallKind::Notify => Ok(ConcreteTarget::All),
            },
            Target::Unicast(id) => {
                check_id(&id)?;
                Ok(ConcreteTarget::One(id))
            }
            Target::Multicast(ids) => {
                if ids.is_empty() {
                    return Err(RpcError::InvalidTarget(
                        "multicast target must name at least one peer".into(),
                    ));
                }

                let mut seen = HashSet::with_capacity(ids.len());
                let mut unique = Vec::with_capacity(ids.len());
                for id in ids {
                    check_id(&id)?;
                    if seen.insert(id.clone()) {
                        unique.push(id);
                    }
                }

                Ok(ConcreteTarget::Many(unique))
            }
        }
    }

    fn reply_target(&self, sender: &PeerId) -> ConcreteTarget {
        ConcreteTarget::One(sender.clone())
    }
}

fn check_id(id: &PeerId) -> Result<()> {
    if id.as_str().trim().is_empty() {
        return Err(RpcError::InvalidTarget("peer id must not be empty".into()));
    }
    Ok(())
}

/// Addressing strategy for `role`.
pub fn resolver_for(role: Role) -> Box<dyn TargetResolver> {
    match role {
        Role::Server => Box::new(ServerResolver),
        Role::Client => Box::new(ClientResolver),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_client_ignores_target() {
        // ---
        let resolver = resolver_for(Role::Client);

        for target in [None, Some(Target::Broadcast), Some(Target::from(3u32))] {
            for kind in [CallKind::Call, CallKind::Notify] {
                let resolved = resolver.resolve("spawn", kind, target.clone()).unwrap();
                assert_eq!(resolved, ConcreteTarget::Peer);
            }
        }
    }

    #[test]
    fn test_server_requires_target() {
        // ---
        let resolver = ServerResolver;

        let err = resolver.resolve("kick", CallKind::Call, None).unwrap_err();
        assert!(matches!(err, RpcError::MissingTarget { ref name } if name == "kick"));

        let err = resolver.resolve("kick", CallKind::Notify, None).unwrap_err();
        assert!(matches!(err, RpcError::MissingTarget { .. }));
    }

    #[test]
    fn test_broadcast_call_rejected_notify_accepted() {
        // ---
        let resolver = ServerResolver;

        for name in ["a", "getInventory", "x.y.z"] {
            let err = resolver
                .resolve(name, CallKind::Call, Some(Target::Broadcast))
                .unwrap_err();
            assert!(matches!(err, RpcError::BroadcastCallNotSupported { .. }));
        }

        let resolved = resolver
            .resolve("weather", CallKind::Notify, Some(Target::Broadcast))
            .unwrap();
        assert_eq!(resolved, ConcreteTarget::All);
    }

    #[test]
    fn test_reply_targets() {
        // ---
        let sender = PeerId::from(4u32);
        assert_eq!(ClientResolver.reply_target(&sender), ConcreteTarget::Peer);
        assert_eq!(ServerResolver.reply_target(&sender), ConcreteTarget::One(sender));
    }

    #[test]
    fn test_unicast() {
        // ---
        let resolved = ServerResolver
            .resolve("heal", CallKind::Call, Some(Target::from(12u32)))
            .unwrap();
        assert_eq!(resolved, ConcreteTarget::One(PeerId::from("12")));
    }

    #[test]
    fn test_multicast_dedup_preserves_order() {
        // ---
        let resolved = ServerResolver
            .resolve("ping", CallKind::Notify, Some(Target::many([3u32, 1, 3, 2, 1])))
            .unwrap();
        assert_eq!(
            resolved,
            ConcreteTarget::Many(vec!["3".into(), "1".into(), "2".into()])
        );
    }

    #[test]
    fn test_malformed_targets() {
        // ---
        let err = ServerResolver
            .resolve("ping", CallKind::Notify, Some(Target::Multicast(vec![])))
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidTarget(_)));

        let err = ServerResolver
            .resolve("ping", CallKind::Call, Some(Target::from("  ")))
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidTarget(_)));

        let err = ServerResolver
            .resolve("ping", CallKind::Notify, Some(Target::many(["1", ""])))
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidTarget(_)));
    }
}
