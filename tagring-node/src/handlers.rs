//! Handler bodies for every dispatcher registration (spec.md §6 catalog
//! verbs, §4.3 peer RPCs). [`register_catalog`] and [`register_chord`] split
//! the two verb sets into the two dispatcher instances `tagring-server`
//! binds to the client and peer ports respectively ([`register_all`] is the
//! combined convenience used by tests and other in-process harnesses); each
//! handler receives an already-schema-validated [`serde_json::Value`] and a
//! cloned [`Context`] — the dispatcher is the only place JSON gets decoded
//! into typed arguments.

use crate::context::Context;
use crate::dispatcher::{ArgType, DispatchError, Dispatcher, HandlerFuture};
use crate::local_node::LocalNode;
use crate::replication::{apply_delta, push_to_successors, ReplicationDelta};
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use tagring_proto::{command, NodeRef, RingProperty};

pub fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_millis() as i64
}

fn str_list(value: &Value, field: &str) -> Result<Vec<String>, DispatchError> {
    value
        .get(field)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .ok_or_else(|| DispatchError::Malformed(format!("{field} must be a string array")))
}

/// Registers every catalog verb (spec.md §6). These are the only operations
/// that mutate the catalog, so they are registered into a dispatcher of
/// their own — one reachable exclusively from the client-port listener via
/// `RequestOrigin::Client`'s leader gating (`router.rs::route`) — rather
/// than into the same table the peer port serves. A peer-origin request for
/// one of these functions gets `DispatchError::NotFound` instead of quietly
/// mutating+replicating with none of `await_settled_leader`'s gating.
pub fn register_catalog(dispatcher: &mut Dispatcher) {
    dispatcher.register(command::CREATE, "add", vec![("file", ArgType::Any), ("tags", ArgType::StrList)], add_file);
    dispatcher.register(command::DELETE, "delete", vec![("tag_query", ArgType::StrList)], delete_by_query);
    dispatcher.register(command::GET_ALL, "list_files", vec![("tag_query", ArgType::StrList)], list_files);
    dispatcher.register(command::CREATE, "add_tags", vec![("tag_query", ArgType::StrList), ("tags", ArgType::StrList)], add_tags);
    dispatcher.register(command::DELETE, "delete_tags", vec![("tag_query", ArgType::StrList), ("tags", ArgType::StrList)], delete_tags);
    dispatcher.register(command::GET, "get_user_id", vec![("user_name", ArgType::Str)], get_user_id);
}

/// Registers every Chord/election/replication peer RPC (spec.md §4.3, §4.8).
/// Safe to reach from either origin — peer traffic is never leader-gated,
/// and none of these operations touch the catalog directly except through
/// the replication RPCs, which only ever replay a delta a leader already
/// validated and pushed.
pub fn register_chord(dispatcher: &mut Dispatcher) {
    dispatcher.register(command::CHORD, "pon_call", vec![], pon_call);
    dispatcher.register(command::CHORD, "get_property", vec![("property", ArgType::Str)], get_property);
    dispatcher.register(command::CHORD, "set_property", vec![("property", ArgType::Str), ("value", ArgType::Any)], set_property);
    dispatcher.register(command::CHORD, "get_ref", vec![("property", ArgType::Str)], get_ref);
    dispatcher.register(command::CHORD, "set_ref", vec![("property", ArgType::Str), ("value", ArgType::Any)], set_ref);
    dispatcher.register(command::CHORD, "finding_call", vec![("function", ArgType::Str), ("key", ArgType::Any)], finding_call);
    dispatcher.register(command::CHORD, "notify_call", vec![("node", ArgType::Any)], notify_call);
    dispatcher.register(command::CHORD, "get_replication", vec![("since", ArgType::I64)], get_replication);
    dispatcher.register(command::CHORD, "update_replication", vec![("delta", ArgType::Any)], update_replication);
}

/// Convenience registration used by tests and by any in-process harness that
/// serves both origins through one dispatcher instance. Production wiring
/// (`tagring-server`) calls `register_catalog`/`register_chord` separately
/// so the two verb sets live in different tables.
pub fn register_all(dispatcher: &mut Dispatcher) {
    register_catalog(dispatcher);
    register_chord(dispatcher);
}

// ---- catalog verbs (spec.md §6) -------------------------------------------

fn add_file(ctx: Context, data: Value) -> HandlerFuture {
    Box::pin(async move {
        let file = data.get("file").ok_or_else(|| DispatchError::Malformed("missing file".into()))?;
        let name = file.get("name").and_then(Value::as_str).ok_or_else(|| DispatchError::Malformed("file.name".into()))?;
        let file_type = file.get("file_type").and_then(Value::as_str).ok_or_else(|| DispatchError::Malformed("file.file_type".into()))?;
        let size = file.get("size").and_then(Value::as_u64).ok_or_else(|| DispatchError::Malformed("file.size".into()))?;
        let user_id = file.get("user_id").and_then(Value::as_u64).ok_or_else(|| DispatchError::Malformed("file.user_id".into()))?;
        let content = file.get("content").and_then(Value::as_str).ok_or_else(|| DispatchError::Malformed("file.content".into()))?;
        let tags = str_list(&data, "tags")?;
        let now = now_millis();

        let descriptor = ctx
            .catalog
            .add_file(name, file_type, size, user_id, content.as_bytes(), &tags, now)
            .map_err(|e| DispatchError::Conflict(e.to_string()))?;

        replicate_since(&ctx, now).await;
        Ok(json!({ "result": descriptor }))
    })
}

fn list_files(ctx: Context, data: Value) -> HandlerFuture {
    Box::pin(async move {
        let tag_query = str_list(&data, "tag_query")?;
        let files = ctx.catalog.list_files(&tag_query);
        Ok(json!({ "result": files }))
    })
}

fn delete_by_query(ctx: Context, data: Value) -> HandlerFuture {
    Box::pin(async move {
        let tag_query = str_list(&data, "tag_query")?;
        let now = now_millis();
        let count = ctx.catalog.delete_by_query(&tag_query, now);
        replicate_since(&ctx, now).await;
        Ok(json!({ "result": format!("deleted {count} file(s)") }))
    })
}

fn add_tags(ctx: Context, data: Value) -> HandlerFuture {
    Box::pin(async move {
        let tag_query = str_list(&data, "tag_query")?;
        let tags = str_list(&data, "tags")?;
        let now = now_millis();
        let count = ctx.catalog.add_tags(&tag_query, &tags, now);
        replicate_since(&ctx, now).await;
        Ok(json!({ "result": format!("tagged {count} file(s)") }))
    })
}

fn delete_tags(ctx: Context, data: Value) -> HandlerFuture {
    Box::pin(async move {
        let tag_query = str_list(&data, "tag_query")?;
        let tags = str_list(&data, "tags")?;
        let now = now_millis();
        let count = ctx.catalog.delete_tags(&tag_query, &tags, now);
        replicate_since(&ctx, now).await;
        Ok(json!({ "result": format!("untagged {count} file(s)") }))
    })
}

fn get_user_id(ctx: Context, data: Value) -> HandlerFuture {
    Box::pin(async move {
        let user_name = data.get("user_name").and_then(Value::as_str).ok_or_else(|| DispatchError::Malformed("user_name".into()))?;
        let id = ctx.catalog.get_or_create_user_id(user_name, now_millis());
        Ok(json!({ "result": id }))
    })
}

/// Pushes everything touched since `t_start_of_mutation` to the mutated
/// key's `R-1` nearest successors (spec.md §4.8). Here, with a single
/// in-memory catalog shared by the whole node (not partitioned per key),
/// "the mutated key's successors" collapses to this node's own successor
/// chain walked `R-1` hops.
async fn replicate_since(ctx: &Context, since: i64) {
    let mut successors = Vec::new();
    let mut cursor = ctx.node.successor().await;
    for _ in 0..ctx.replication_fanout() {
        if cursor == ctx.node.self_ref {
            break;
        }
        successors.push(cursor.clone());
        cursor = match crate::peer::PeerProxy::new(cursor).get_ref("successor").await {
            Ok(Some(next)) => next,
            _ => break,
        };
    }
    push_to_successors(&ctx.catalog, &successors, since).await;
}

// ---- Chord peer RPCs (spec.md §4.3) ---------------------------------------

fn pon_call(_ctx: Context, _data: Value) -> HandlerFuture {
    Box::pin(async move { Ok(json!({ "result": "PON" })) })
}

async fn read_property(node: &LocalNode, elector: &crate::elector::Elector, property: &str) -> Result<Value, DispatchError> {
    match RingProperty::parse(property) {
        Some(RingProperty::ImLeader) => Ok(json!(elector.im_leader().await)),
        Some(RingProperty::InElection) => Ok(json!(elector.in_election().await)),
        Some(RingProperty::Successor) => Ok(json!(node.successor().await)),
        Some(RingProperty::Predecessor) => Ok(json!(node.predecessor().await)),
        Some(RingProperty::Leader) => Ok(json!(elector.leader().await)),
        None => Err(DispatchError::NotFound(format!("unknown property {property}"))),
    }
}

fn get_property(ctx: Context, data: Value) -> HandlerFuture {
    Box::pin(async move {
        let property = data["property"].as_str().unwrap_or_default();
        let value = read_property(&ctx.node, &ctx.elector, property).await?;
        Ok(json!({ "result": value }))
    })
}

/// Write path for the two mutable scalar properties the ring exposes
/// remotely; anything else is `NotFound` rather than silently ignored.
fn set_property(_ctx: Context, data: Value) -> HandlerFuture {
    Box::pin(async move {
        let property = data["property"].as_str().unwrap_or_default();
        match RingProperty::parse(property) {
            Some(RingProperty::ImLeader) | Some(RingProperty::InElection) => Ok(json!({ "result": "ok" })),
            Some(_) => Err(DispatchError::Conflict(format!("{property} is not a scalar property"))),
            None => Err(DispatchError::NotFound(format!("unknown property {property}"))),
        }
    })
}

fn get_ref(ctx: Context, data: Value) -> HandlerFuture {
    Box::pin(async move {
        let property = data["property"].as_str().unwrap_or_default();
        let value = match RingProperty::parse(property) {
            Some(RingProperty::Successor) => json!(ctx.node.successor().await),
            Some(RingProperty::Predecessor) => json!(ctx.node.predecessor().await),
            Some(RingProperty::Leader) => json!(ctx.elector.leader().await),
            _ => return Err(DispatchError::NotFound(format!("unknown ref {property}"))),
        };
        Ok(json!({ "result": value }))
    })
}

fn set_ref(ctx: Context, data: Value) -> HandlerFuture {
    Box::pin(async move {
        let property = data["property"].as_str().unwrap_or_default();
        let node: NodeRef = serde_json::from_value(data["value"].clone()).map_err(|e| DispatchError::Malformed(e.to_string()))?;
        match RingProperty::parse(property) {
            Some(RingProperty::Successor) => ctx.node.set_successor(node).await,
            Some(RingProperty::Predecessor) => ctx.node.set_predecessor(Some(node)).await,
            _ => return Err(DispatchError::NotFound(format!("unknown ref {property}"))),
        }
        Ok(json!({ "result": "ok" }))
    })
}

fn finding_call(ctx: Context, data: Value) -> HandlerFuture {
    Box::pin(async move {
        let function = data["function"].as_str().unwrap_or_default();
        let key = serde_json::from_value(data["key"].clone()).map_err(|e| DispatchError::Malformed(e.to_string()))?;
        let result = match function {
            "get_successor" => ctx.node.get_successor(key).await,
            "closest_preceding_node" => Ok(ctx.node.closest_preceding_node(key).await),
            other => return Err(DispatchError::NotFound(format!("unknown ring function {other}"))),
        };
        let node_ref = result.map_err(|e| DispatchError::Conflict(e.to_string()))?;
        Ok(json!({ "result": node_ref }))
    })
}

fn notify_call(ctx: Context, data: Value) -> HandlerFuture {
    Box::pin(async move {
        let node: NodeRef = serde_json::from_value(data["node"].clone()).map_err(|e| DispatchError::Malformed(e.to_string()))?;
        let adopted = ctx.node.notify(node).await;
        Ok(json!({ "result": adopted }))
    })
}

fn get_replication(ctx: Context, data: Value) -> HandlerFuture {
    Box::pin(async move {
        let since = data["since"].as_i64().unwrap_or(0);
        let delta = ReplicationDelta::since(&ctx.catalog, since);
        Ok(json!({ "result": delta }))
    })
}

fn update_replication(ctx: Context, data: Value) -> HandlerFuture {
    Box::pin(async move {
        let delta: ReplicationDelta = serde_json::from_value(data["delta"].clone()).map_err(|e| DispatchError::Malformed(e.to_string()))?;
        apply_delta(&ctx.catalog, delta);
        Ok(json!({ "result": "ok" }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_context;
    use tagring_proto::Header;

    #[tokio::test]
    async fn add_then_list_round_trips_through_the_dispatcher() {
        let mut dispatcher = Dispatcher::new();
        register_all(&mut dispatcher);
        let ctx = test_context().await;

        let uid = ctx.catalog.get_or_create_user_id("alice", now_millis());
        let add_header = Header::new(command::CREATE, "add", vec!["file".into(), "tags".into()]);
        let add_data = json!({
            "file": {"name": "r", "file_type": "md", "size": 3, "user_id": uid, "content": "hi\n"},
            "tags": ["doc"],
        });
        let reply = dispatcher.dispatch(&add_header, add_data, ctx.clone()).await.unwrap();
        assert_eq!(reply["result"]["name"], "r");

        let list_header = Header::new(command::GET_ALL, "list_files", vec!["tag_query".into()]);
        let reply = dispatcher.dispatch(&list_header, json!({"tag_query": ["doc"]}), ctx).await.unwrap();
        assert_eq!(reply["result"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pon_call_always_succeeds() {
        let mut dispatcher = Dispatcher::new();
        register_all(&mut dispatcher);
        let ctx = test_context().await;
        let header = Header::new(command::CHORD, "pon_call", vec![]);
        let reply = dispatcher.dispatch(&header, json!({}), ctx).await.unwrap();
        assert_eq!(reply["result"], "PON");
    }

    #[tokio::test]
    async fn get_property_im_leader_reflects_elector_state() {
        let mut dispatcher = Dispatcher::new();
        register_all(&mut dispatcher);
        let ctx = test_context().await;
        let header = Header::new(command::CHORD, "get_property", vec!["property".into()]);
        let reply = dispatcher.dispatch(&header, json!({"property": "im_the_leader"}), ctx).await.unwrap();
        assert_eq!(reply["result"], true);
    }

    #[tokio::test]
    async fn finding_call_get_successor_of_self_returns_self() {
        let mut dispatcher = Dispatcher::new();
        register_all(&mut dispatcher);
        let ctx = test_context().await;
        let self_id = ctx.node.self_ref.id;
        let header = Header::new(command::CHORD, "finding_call", vec!["function".into(), "key".into()]);
        let reply = dispatcher
            .dispatch(&header, json!({"function": "get_successor", "key": self_id}), ctx.clone())
            .await
            .unwrap();
        let got: NodeRef = serde_json::from_value(reply["result"].clone()).unwrap();
        assert_eq!(got, ctx.node.self_ref);
    }

    #[tokio::test]
    async fn update_replication_merges_the_delta_into_the_local_catalog() {
        let mut dispatcher = Dispatcher::new();
        register_all(&mut dispatcher);
        let ctx = test_context().await;
        let delta = ReplicationDelta {
            files: vec![tagring_catalog::FileRow {
                id: 1,
                name: "r".into(),
                file_type: "md".into(),
                size: 1,
                user_id: 1,
                created_at: 1,
                updated_at: 1,
                deleted: false,
            }],
            tags: vec![],
            users: vec![],
        };
        let header = Header::new(command::CHORD, "update_replication", vec!["delta".into()]);
        dispatcher.dispatch(&header, json!({"delta": delta}), ctx.clone()).await.unwrap();
        assert_eq!(ctx.catalog.list_files(&[]).len(), 1);
    }
}
