// 代理链路集成测试
//
// 使用进程内伪上游验证:
// 1. 凭证缺失与请求体校验
// 2. 非流式转发 + usage 入账
// 3. 流式转发 (SSE) + 增量统计入账
// 4. 上游错误状态原样透传 (不入账)
// 5. 未归属凭证转发到默认上游且用量丢弃
// 6. 客户端中途断开: 中止上游读取且不入账
// 7. 账本写入失败不影响已就绪的响应

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
};
use futures::StreamExt;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tower::ServiceExt;

use common::{spawn_slow_sse_upstream, spawn_upstream, TestContext};

fn messages_request(api_key: Option<&str>, body: String) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/v1/messages")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = api_key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::from(body)).unwrap()
}

async fn response_json(response: axum::response::Response) -> JsonValue {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_missing_api_key_rejected_without_upstream_call() {
    let ctx = TestContext::new();
    // 上游地址故意不可达: 凭证缺失时根本不应触达上游
    let router = ctx.proxy_router("http://127.0.0.1:1");

    let response = router
        .oneshot(messages_request(None, json!({"model": "m"}).to_string()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = response_json(response).await;
    assert_eq!(body["error"]["type"], "authentication_error");
}

#[tokio::test]
async fn test_invalid_json_body_rejected() {
    let ctx = TestContext::new();
    let router = ctx.proxy_router("http://127.0.0.1:1");

    let response = router
        .oneshot(messages_request(Some("sk-any"), "{not json".to_string()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_unreachable_upstream_yields_bad_gateway() {
    let ctx = TestContext::new();
    ctx.create_profile("work", "sk-work", "http://127.0.0.1:1").await;
    let router = ctx.proxy_router("http://127.0.0.1:1");

    let response = router
        .oneshot(messages_request(
            Some("sk-work"),
            json!({"model": "m", "messages": []}).to_string(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = response_json(response).await;
    assert_eq!(body["error"]["type"], "upstream_error");
}

#[tokio::test]
async fn test_buffered_relay_passes_body_through_and_records_usage() {
    let upstream = spawn_upstream(
        StatusCode::OK,
        "application/json",
        r#"{"id":"msg_1","content":[{"type":"text","text":"hi"}],"usage":{"input_tokens":12,"output_tokens":4}}"#,
    )
    .await;

    let ctx = TestContext::new();
    let profile = ctx.create_profile("work", "sk-work", &upstream).await;
    let router = ctx.proxy_router("http://127.0.0.1:1");

    let response = router
        .oneshot(messages_request(
            Some("sk-work"),
            json!({"model": "claude-3-opus-20240229", "messages": []}).to_string(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    // 响应体原样透传
    assert_eq!(body["id"], "msg_1");
    assert_eq!(body["usage"]["input_tokens"], 12);

    let records = ctx.usage_ledger.list().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].profile_id, profile.id);
    assert_eq!(records[0].model_name, "claude-3-opus-20240229");
    assert_eq!(records[0].input_tokens, 12);
    assert_eq!(records[0].output_tokens, 4);
    assert_eq!(records[0].request_count, 1);
}

#[tokio::test]
async fn test_upstream_error_status_relayed_verbatim_without_recording() {
    let upstream = spawn_upstream(
        StatusCode::TOO_MANY_REQUESTS,
        "application/json",
        r#"{"error":{"type":"rate_limit_error","message":"slow down"}}"#,
    )
    .await;

    let ctx = TestContext::new();
    ctx.create_profile("work", "sk-work", &upstream).await;
    let router = ctx.proxy_router("http://127.0.0.1:1");

    let response = router
        .oneshot(messages_request(
            Some("sk-work"),
            json!({"model": "m", "messages": []}).to_string(),
        ))
        .await
        .unwrap();

    // 状态码与 body 都不做翻译
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = response_json(response).await;
    assert_eq!(body["error"]["type"], "rate_limit_error");

    assert!(ctx.usage_ledger.list().await.unwrap().is_empty());
}

const SSE_TRANSCRIPT: &str = concat!(
    "event: message_start\n",
    "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":50}}}\n",
    "\n",
    "event: content_block_delta\n",
    "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n",
    "\n",
    "event: message_delta\n",
    "data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":1}}\n",
    "\n",
    "event: message_delta\n",
    "data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":3}}\n",
    "\n",
    "event: message_stop\n",
    "data: {\"type\":\"message_stop\"}\n",
    "\n",
);

#[tokio::test]
async fn test_streaming_relay_forwards_sse_and_accumulates_usage() {
    let upstream = spawn_upstream(StatusCode::OK, "text/event-stream", SSE_TRANSCRIPT).await;

    let ctx = TestContext::new();
    let profile = ctx.create_profile("work", "sk-work", &upstream).await;
    let router = ctx.proxy_router("http://127.0.0.1:1");

    let response = router
        .oneshot(messages_request(
            Some("sk-work"),
            json!({"model": "claude-3-opus-20240229", "messages": [], "stream": true}).to_string(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("Content-Type").unwrap(),
        "text/event-stream"
    );
    assert_eq!(response.headers().get("X-Accel-Buffering").unwrap(), "no");

    // 转发字节与上游完全一致
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.as_ref(), SSE_TRANSCRIPT.as_bytes());

    // body 读完意味着转发任务已结束，账本此时已提交
    let records = ctx.usage_ledger.list().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].profile_id, profile.id);
    assert_eq!(records[0].input_tokens, 50);
    assert_eq!(records[0].output_tokens, 4);
    assert_eq!(records[0].total_tokens, 54);
}

#[tokio::test]
async fn test_streaming_upstream_error_passthrough_without_recording() {
    let upstream = spawn_upstream(
        StatusCode::INTERNAL_SERVER_ERROR,
        "application/json",
        r#"{"error":{"type":"api_error","message":"overloaded"}}"#,
    )
    .await;

    let ctx = TestContext::new();
    ctx.create_profile("work", "sk-work", &upstream).await;
    let router = ctx.proxy_router("http://127.0.0.1:1");

    let response = router
        .oneshot(messages_request(
            Some("sk-work"),
            json!({"model": "m", "stream": true}).to_string(),
        ))
        .await
        .unwrap();

    // 非 2xx 不建立 SSE 流，直接透传
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = response_json(response).await;
    assert_eq!(body["error"]["type"], "api_error");

    assert!(ctx.usage_ledger.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_client_disconnect_aborts_stream_without_recording() {
    let upstream = spawn_slow_sse_upstream().await;

    let ctx = TestContext::new();
    ctx.create_profile("work", "sk-work", &upstream).await;
    let router = ctx.proxy_router("http://127.0.0.1:1");

    let response = router
        .oneshot(messages_request(
            Some("sk-work"),
            json!({"model": "claude-3-opus-20240229", "stream": true}).to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // 只读第一帧就丢弃 body，模拟客户端断开
    let mut body_stream = response.into_body().into_data_stream();
    let first = body_stream.next().await.unwrap().unwrap();
    assert!(first.starts_with(b"data: "));
    drop(body_stream);

    // 留出转发任务发现断开并退出的时间
    tokio::time::sleep(Duration::from_millis(400)).await;

    // 部分用量不可靠，不入账
    assert!(ctx.usage_ledger.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_ledger_write_failure_does_not_affect_response() {
    let upstream = spawn_upstream(
        StatusCode::OK,
        "application/json",
        r#"{"id":"msg_3","usage":{"input_tokens":12,"output_tokens":4}}"#,
    )
    .await;

    let ctx = TestContext::new();
    ctx.create_profile("work", "sk-work", &upstream).await;
    // 把账本路径占成目录，使任何读写都失败
    tokio::fs::create_dir(ctx.dir.path().join("token-stats.json"))
        .await
        .unwrap();

    let router = ctx.proxy_router("http://127.0.0.1:1");
    let response = router
        .oneshot(messages_request(
            Some("sk-work"),
            json!({"model": "m", "messages": []}).to_string(),
        ))
        .await
        .unwrap();

    // 入账失败只记日志，响应不受影响
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["id"], "msg_3");
    assert_eq!(body["usage"]["output_tokens"], 4);

    // 该次用量丢失
    assert!(ctx.usage_ledger.list().await.is_err());
}

#[tokio::test]
async fn test_unresolved_credential_forwards_to_default_upstream_and_discards_usage() {
    let upstream = spawn_upstream(
        StatusCode::OK,
        "application/json",
        r#"{"id":"msg_2","usage":{"input_tokens":9,"output_tokens":3}}"#,
    )
    .await;

    let ctx = TestContext::new();
    // 没有任何 profile 匹配该凭证，走默认上游
    let router = ctx.proxy_router(&upstream);

    let response = router
        .oneshot(messages_request(
            Some("sk-unknown"),
            json!({"model": "m", "messages": []}).to_string(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["id"], "msg_2");

    // 未归属身份的用量不入账
    assert!(ctx.usage_ledger.list().await.unwrap().is_empty());
}
