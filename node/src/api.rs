//! # JSON-RPC HTTP API
//!
//! The node's external query/submit surface: a single `POST /rpc` endpoint
//! speaking JSON-RPC 2.0, plus a `GET /health` liveness probe.
//!
//! | Method                 | Params               | Result                          |
//! |------------------------|----------------------|---------------------------------|
//! | `get_account_state`    | `{ "address" }`      | `{ address, balance, nonce }`   |
//! | `send_raw_transaction` | `{ "tx_data": hex }` | transaction hash (hex)          |
//!
//! Error codes follow the JSON-RPC conventions: −32700 parse error, −32601
//! method not found, −32602 invalid params, −32000 internal error.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use quartz_protocol::codec;
use quartz_protocol::network::Mempool;
use quartz_protocol::storage::Chain;
use quartz_protocol::transaction::Transaction;
use quartz_protocol::types::Address;

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state for all request handlers. Cheap to clone: everything is
/// behind `Arc` or a channel handle.
#[derive(Clone)]
pub struct ApiState {
    /// The local chain (and through it, account state).
    pub chain: Arc<Chain>,
    /// The pending transaction pool.
    pub mempool: Arc<Mempool>,
    /// Feed into the broadcast worker for transactions admitted via RPC.
    pub tx_broadcast: mpsc::Sender<Transaction>,
    /// Prometheus handles for in-handler recording.
    pub metrics: SharedMetrics,
}

/// Builds the axum router for the RPC port.
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/rpc", post(rpc_handler))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// JSON-RPC envelope
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request envelope.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version; expected to be "2.0".
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    /// Method name.
    pub method: String,
    /// Method parameters.
    pub params: Option<serde_json::Value>,
    /// Request identifier, echoed back.
    #[serde(default)]
    pub id: serde_json::Value,
}

/// A JSON-RPC 2.0 response envelope.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: serde_json::Value,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;
const INTERNAL_ERROR: i32 = -32000;

fn ok_response(id: serde_json::Value, result: serde_json::Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        result: Some(result),
        error: None,
        id,
    }
}

fn error_response(id: serde_json::Value, code: i32, message: impl Into<String>) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        result: None,
        error: Some(JsonRpcError {
            code,
            message: message.into(),
        }),
        id,
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: liveness probe.
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `POST /rpc`: parses the envelope and dispatches on the method name.
///
/// The body is taken as a raw string so a malformed envelope maps to the
/// JSON-RPC −32700 code instead of a framework-flavored 400.
async fn rpc_handler(State(state): State<ApiState>, body: String) -> Json<JsonRpcResponse> {
    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(_) => {
            return Json(error_response(
                serde_json::Value::Null,
                PARSE_ERROR,
                "parse error",
            ))
        }
    };
    debug!(method = %request.method, "rpc request");
    Json(dispatch(&state, request).await)
}

/// Routes a parsed request. Split from the HTTP layer so tests can call it
/// without a server.
pub async fn dispatch(state: &ApiState, request: JsonRpcRequest) -> JsonRpcResponse {
    match request.method.as_str() {
        "get_account_state" => get_account_state(state, request),
        "send_raw_transaction" => send_raw_transaction(state, request).await,
        other => error_response(
            request.id,
            METHOD_NOT_FOUND,
            format!("method not found: {other}"),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct GetAccountStateParams {
    address: String,
}

/// The account record as presented to RPC clients.
#[derive(Debug, Serialize)]
struct AccountStateResult {
    address: String,
    balance: u64,
    nonce: u64,
}

fn get_account_state(state: &ApiState, request: JsonRpcRequest) -> JsonRpcResponse {
    let params: GetAccountStateParams =
        match serde_json::from_value(request.params.unwrap_or_default()) {
            Ok(params) => params,
            Err(_) => return error_response(request.id, INVALID_PARAMS, "invalid params"),
        };

    let address = match Address::from_hex(&params.address) {
        Ok(address) => address,
        Err(e) => {
            return error_response(
                request.id,
                INVALID_PARAMS,
                format!("invalid address: {e}"),
            )
        }
    };

    match state.chain.state().get(&address) {
        Ok(account) => ok_response(
            request.id,
            serde_json::json!(AccountStateResult {
                address: account.address.to_string(),
                balance: account.balance,
                nonce: account.nonce,
            }),
        ),
        Err(e) => error_response(
            request.id,
            INTERNAL_ERROR,
            format!("internal error: {e}"),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct SendRawTransactionParams {
    tx_data: String,
}

async fn send_raw_transaction(state: &ApiState, request: JsonRpcRequest) -> JsonRpcResponse {
    let params: SendRawTransactionParams =
        match serde_json::from_value(request.params.unwrap_or_default()) {
            Ok(params) => params,
            Err(_) => return error_response(request.id, INVALID_PARAMS, "invalid params"),
        };

    let stripped = params
        .tx_data
        .strip_prefix("0x")
        .unwrap_or(&params.tx_data);
    let raw = match hex::decode(stripped) {
        Ok(raw) => raw,
        Err(_) => {
            return error_response(
                request.id,
                INVALID_PARAMS,
                "invalid tx_data: not a hex string",
            )
        }
    };

    let tx: Transaction = match codec::decode(&raw) {
        Ok(tx) => tx,
        Err(e) => {
            return error_response(
                request.id,
                INVALID_PARAMS,
                format!("invalid tx_data: {e}"),
            )
        }
    };

    if let Err(e) = tx.verify() {
        return error_response(request.id, INVALID_PARAMS, format!("invalid transaction: {e}"));
    }

    let hash = tx.hash();
    if !state.mempool.contains(&hash) {
        if let Err(e) = state.mempool.add(tx.clone()) {
            return error_response(request.id, INTERNAL_ERROR, format!("internal error: {e}"));
        }
        state
            .metrics
            .transactions_in_mempool
            .set(state.mempool.pending_count() as i64);
        // Hand off to the broadcast worker; a closed channel means we are
        // shutting down and the admission alone is still truthful.
        let _ = state.tx_broadcast.send(tx).await;
        info!(hash = %hash, "transaction received via rpc");
    }

    ok_response(request.id, serde_json::json!(hash.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quartz_protocol::config;
    use quartz_protocol::crypto::PrivateKey;
    use quartz_protocol::storage::{AccountState, Block, SledStorage, Storage};
    use crate::metrics::NodeMetrics;

    fn make_state() -> (ApiState, mpsc::Receiver<Transaction>) {
        let store: Arc<dyn Storage> = Arc::new(SledStorage::open_temporary().unwrap());
        let chain = Arc::new(Chain::new(store, Block::genesis(0)).unwrap());
        let mempool = Arc::new(Mempool::new(config::DEFAULT_MEMPOOL_CAPACITY));
        let (tx_broadcast, tx_rx) = mpsc::channel(config::BROADCAST_CHANNEL_CAPACITY);
        (
            ApiState {
                chain,
                mempool,
                tx_broadcast,
                metrics: Arc::new(NodeMetrics::new()),
            },
            tx_rx,
        )
    }

    fn request(method: &str, params: serde_json::Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: Some("2.0".into()),
            method: method.into(),
            params: Some(params),
            id: serde_json::json!(1),
        }
    }

    #[tokio::test]
    async fn unknown_method_is_32601() {
        let (state, _rx) = make_state();
        let response = dispatch(&state, request("no_such_method", serde_json::json!({}))).await;
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn get_account_state_returns_zero_account() {
        let (state, _rx) = make_state();
        let addr = "1111111111111111111111111111111111111111";
        let response = dispatch(
            &state,
            request("get_account_state", serde_json::json!({ "address": addr })),
        )
        .await;

        let result = response.result.unwrap();
        assert_eq!(result["address"], addr);
        assert_eq!(result["balance"], 0);
        assert_eq!(result["nonce"], 0);
    }

    #[tokio::test]
    async fn get_account_state_reads_real_balances() {
        let (state, _rx) = make_state();
        let addr = Address::from_bytes([0x11; 20]);
        state
            .chain
            .state()
            .put(&AccountState::with_balance(addr, 1_000))
            .unwrap();

        let response = dispatch(
            &state,
            request(
                "get_account_state",
                serde_json::json!({ "address": format!("0x{addr}") }),
            ),
        )
        .await;

        let result = response.result.unwrap();
        assert_eq!(result["balance"], 1_000);
    }

    #[tokio::test]
    async fn bad_address_is_32602() {
        let (state, _rx) = make_state();
        let response = dispatch(
            &state,
            request("get_account_state", serde_json::json!({ "address": "xyz" })),
        )
        .await;
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn missing_params_is_32602() {
        let (state, _rx) = make_state();
        let response = dispatch(
            &state,
            JsonRpcRequest {
                jsonrpc: Some("2.0".into()),
                method: "get_account_state".into(),
                params: None,
                id: serde_json::json!(7),
            },
        )
        .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, INVALID_PARAMS);
        assert_eq!(response.id, serde_json::json!(7));
    }

    #[tokio::test]
    async fn send_raw_transaction_admits_and_forwards() {
        let (state, mut tx_rx) = make_state();

        let key = PrivateKey::generate();
        let mut tx = Transaction::new(Vec::new(), Address::from_bytes([0x22; 20]), 5, 0);
        tx.sign(&key);
        let tx_data = hex::encode(codec::encode(&tx).unwrap());

        let response = dispatch(
            &state,
            request("send_raw_transaction", serde_json::json!({ "tx_data": tx_data })),
        )
        .await;

        assert_eq!(
            response.result.unwrap(),
            serde_json::json!(tx.hash().to_string())
        );
        assert!(state.mempool.contains(&tx.hash()));
        assert_eq!(tx_rx.try_recv().unwrap().hash(), tx.hash());
    }

    #[tokio::test]
    async fn resubmitting_a_pooled_transaction_is_idempotent() {
        let (state, mut tx_rx) = make_state();

        let key = PrivateKey::generate();
        let mut tx = Transaction::new(Vec::new(), Address::from_bytes([0x22; 20]), 5, 0);
        tx.sign(&key);
        let tx_data = hex::encode(codec::encode(&tx).unwrap());
        let params = serde_json::json!({ "tx_data": tx_data });

        dispatch(&state, request("send_raw_transaction", params.clone())).await;
        let response = dispatch(&state, request("send_raw_transaction", params)).await;

        assert!(response.error.is_none());
        assert_eq!(state.mempool.pending_count(), 1);
        // Only the first admission is re-broadcast.
        tx_rx.try_recv().unwrap();
        assert!(tx_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsigned_transaction_is_32602() {
        let (state, _rx) = make_state();
        let tx = Transaction::new(Vec::new(), Address::from_bytes([0x22; 20]), 5, 0);
        let tx_data = hex::encode(codec::encode(&tx).unwrap());

        let response = dispatch(
            &state,
            request("send_raw_transaction", serde_json::json!({ "tx_data": tx_data })),
        )
        .await;
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn non_hex_tx_data_is_32602() {
        let (state, _rx) = make_state();
        let response = dispatch(
            &state,
            request("send_raw_transaction", serde_json::json!({ "tx_data": "zz" })),
        )
        .await;
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }
}
