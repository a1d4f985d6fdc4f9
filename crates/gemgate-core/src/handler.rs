use std::collections::VecDeque;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, Method, Uri};
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::unfold;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use gemgate_protocol::gemini::embed::EmbedContentResponse;
use gemgate_protocol::gemini::generate::GenerateContentResponse;
use gemgate_protocol::gemini::imagen::ImagenPredictResponse;
use gemgate_protocol::gemini::models::ListModelsResponse;
use gemgate_protocol::openai::chat::ChatCompletionRequestBody;
use gemgate_protocol::openai::embeddings::EmbeddingsRequestBody;
use gemgate_protocol::openai::images::ImageGenerationRequestBody;
use gemgate_protocol::sse::SseParser;
use gemgate_transform::chat::{ChatStreamState, to_alt_response, to_native_request};
use gemgate_transform::image::ImagePlan;
use gemgate_transform::{embed, image, models};

use crate::auth::{AuthError, AuthMode, authenticate};
use crate::classify::{NativeOp, RouteClass, classify_request};
use crate::core::GatewayState;
use crate::error::{GatewayError, ProxyError, UpstreamError};
use crate::native;
use crate::pool::select_and_execute;
use crate::response::{ByteStream, GatewayResponse, sse_done, sse_frame};
use crate::store::GatewayConfig;
use crate::upstream::UpstreamImageFetcher;

const REQUEST_ID_HEADER: &str = "x-gemgate-request-id";

pub async fn gateway_handler(
    State(state): State<Arc<GatewayState>>,
    Path(path): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method == Method::OPTIONS {
        return preflight_response();
    }

    let trace_id = Uuid::new_v4().to_string();
    let started_at = Instant::now();

    let class = match classify_request(&method, &path) {
        Ok(class) => class,
        Err(err) => return error_response(err.into(), &trace_id),
    };

    let config = state.store.snapshot();
    let mode = match authenticate(&headers, uri.query(), &config) {
        Ok(mode) => mode,
        Err(err) => return auth_error_response(err, &trace_id),
    };

    info!(
        event = "downstream_received",
        trace_id = %trace_id,
        op = class.operation(),
        method = %method,
        path = %path,
        pool = matches!(mode, AuthMode::Pool),
    );

    let result = dispatch(&state, &config, &mode, &class, body, uri.query()).await;
    let elapsed_ms = started_at.elapsed().as_millis() as u64;

    match result {
        Ok(response) => {
            let (status, is_stream) = match &response {
                GatewayResponse::Json { status, .. } => (*status, false),
                GatewayResponse::Stream { status, .. } => (*status, true),
            };
            info!(
                event = "downstream_responded",
                trace_id = %trace_id,
                op = class.operation(),
                status = status.as_u16(),
                elapsed_ms,
                is_stream,
            );
            final_response(response, &trace_id)
        }
        Err(err) => {
            let status = match &err {
                GatewayError::Proxy(err) => err.status,
                GatewayError::Upstream(err) => err.status,
            };
            warn!(
                event = "downstream_responded",
                trace_id = %trace_id,
                op = class.operation(),
                status = status.as_u16(),
                elapsed_ms,
            );
            error_response(err, &trace_id)
        }
    }
}

async fn dispatch(
    state: &GatewayState,
    config: &GatewayConfig,
    mode: &AuthMode,
    class: &RouteClass,
    body: Bytes,
    query: Option<&str>,
) -> Result<GatewayResponse, GatewayError> {
    match class {
        RouteClass::Native { op, model } => {
            run_native(state, config, mode, *op, model.as_deref(), body, query).await
        }
        RouteClass::AltChat => run_alt_chat(state, config, mode, &body).await,
        RouteClass::AltEmbed => run_alt_embed(state, config, mode, &body).await,
        RouteClass::AltImage => run_alt_image(state, config, mode, &body).await,
        RouteClass::AltModels => run_alt_models(state, config, mode).await,
    }
}

async fn run_native(
    state: &GatewayState,
    config: &GatewayConfig,
    mode: &AuthMode,
    op: NativeOp,
    model: Option<&str>,
    body: Bytes,
    query: Option<&str>,
) -> Result<GatewayResponse, GatewayError> {
    let ops = &state.ops;

    match op {
        NativeOp::ListModels => {
            let query = forwardable_query(query);
            let response = select_and_execute(state.store.as_ref(), config, mode, None, |key| {
                state.upstream.send(ops.list_models(query.as_deref(), key))
            })
            .await?;
            Ok(GatewayResponse::json(response.body.into_bytes()?))
        }
        NativeOp::GetModel => {
            let model = require_model(model)?;
            let response =
                select_and_execute(state.store.as_ref(), config, mode, Some(model), |key| {
                    state.upstream.send(ops.get_model(model, key))
                })
                .await?;
            Ok(GatewayResponse::json(response.body.into_bytes()?))
        }
        NativeOp::Generate | NativeOp::ImageGemini => {
            let model = require_model(model)?;
            let parsed: native::NativeGenerateBody = parse_json(&body)?;
            let normalized = native::normalize_generate_body(parsed);
            if op == NativeOp::ImageGemini {
                native::require_image_modality(&normalized)?;
            }
            let payload = Bytes::from(serde_json::to_vec(&normalized)?);
            let response =
                select_and_execute(state.store.as_ref(), config, mode, Some(model), |key| {
                    state.upstream.send(ops.generate(model, payload.clone(), key))
                })
                .await?;
            Ok(GatewayResponse::json(response.body.into_bytes()?))
        }
        NativeOp::StreamGenerate => {
            let model = require_model(model)?;
            let parsed: native::NativeGenerateBody = parse_json(&body)?;
            let normalized = native::normalize_generate_body(parsed);
            let payload = Bytes::from(serde_json::to_vec(&normalized)?);
            let response =
                select_and_execute(state.store.as_ref(), config, mode, Some(model), |key| {
                    state
                        .upstream
                        .send(ops.stream_generate(model, payload.clone(), key))
                })
                .await?;
            let upstream = response.body.into_stream()?;
            Ok(GatewayResponse::sse(native::native_sse_stream(upstream)))
        }
        NativeOp::Embed | NativeOp::BatchEmbed | NativeOp::CountTokens => {
            let model = require_model(model)?;
            ensure_json(&body)?;
            let response =
                select_and_execute(state.store.as_ref(), config, mode, Some(model), |key| {
                    let request = match op {
                        NativeOp::Embed => ops.embed(model, body.clone(), key),
                        NativeOp::BatchEmbed => ops.batch_embed(model, body.clone(), key),
                        _ => ops.count_tokens(model, body.clone(), key),
                    };
                    state.upstream.send(request)
                })
                .await?;
            Ok(GatewayResponse::json(response.body.into_bytes()?))
        }
        NativeOp::ImageImagen => {
            let model = require_model(model)?;
            let parsed: native::ImagenGenerateBody = parse_json(&body)?;
            let payload = Bytes::from(serde_json::to_vec(&native::imagen_predict_body(parsed))?);
            let response =
                select_and_execute(state.store.as_ref(), config, mode, Some(model), |key| {
                    state
                        .upstream
                        .send(ops.imagen_predict(model, payload.clone(), key))
                })
                .await?;
            Ok(GatewayResponse::json(response.body.into_bytes()?))
        }
    }
}

async fn run_alt_chat(
    state: &GatewayState,
    config: &GatewayConfig,
    mode: &AuthMode,
    body: &Bytes,
) -> Result<GatewayResponse, GatewayError> {
    let request: ChatCompletionRequestBody = parse_json(body)?;
    let model = bare_model(&request.model).to_string();
    let effort = request
        .reasoning
        .as_ref()
        .and_then(|reasoning| reasoning.effort.clone());

    let fetcher = UpstreamImageFetcher::new(state.upstream.clone());
    let native_body = to_native_request(&request, &fetcher).await?;
    let payload = Bytes::from(serde_json::to_vec(&native_body)?);

    if request.is_stream() {
        let response = select_and_execute(state.store.as_ref(), config, mode, Some(&model), |key| {
            state
                .upstream
                .send(state.ops.stream_generate(&model, payload.clone(), key))
        })
        .await?;
        let upstream = response.body.into_stream()?;
        // Usage inclusion is force-enabled for alt-chat streams; the trailing
        // usage frame is emitted whenever upstream reported usage.
        let chat_state = ChatStreamState::new(request.model.clone(), true);
        Ok(GatewayResponse::sse(alt_chat_sse_stream(upstream, chat_state)))
    } else {
        let response = select_and_execute(state.store.as_ref(), config, mode, Some(&model), |key| {
            state
                .upstream
                .send(state.ops.generate(&model, payload.clone(), key))
        })
        .await?;
        let bytes = response.body.into_bytes()?;
        let native: GenerateContentResponse = parse_upstream(&bytes)?;
        let alt = to_alt_response(&native, &request.model, effort);
        Ok(GatewayResponse::json(serde_json::to_vec(&alt)?))
    }
}

async fn run_alt_embed(
    state: &GatewayState,
    config: &GatewayConfig,
    mode: &AuthMode,
    body: &Bytes,
) -> Result<GatewayResponse, GatewayError> {
    let request: EmbeddingsRequestBody = parse_json(body)?;
    let EmbeddingsRequestBody {
        model,
        input,
        dimensions,
    } = request;
    let bare = bare_model(&model).to_string();

    let items = input.into_items();
    let mut results = Vec::with_capacity(items.len());
    for item in &items {
        let native = embed::to_native_request(&bare, item, dimensions);
        let payload = Bytes::from(serde_json::to_vec(&native)?);
        let outcome = select_and_execute(state.store.as_ref(), config, mode, Some(&bare), |key| {
            state
                .upstream
                .send(state.ops.embed(&bare, payload.clone(), key))
        })
        .await;

        results.push(match outcome {
            Ok(response) => match response.body.into_bytes() {
                Ok(bytes) => serde_json::from_slice::<EmbedContentResponse>(&bytes)
                    .map(|parsed| parsed.embedding.values)
                    .map_err(|err| format!("invalid upstream embedding: {err}")),
                Err(err) => Err(upstream_error_message(&err)),
            },
            Err(err) => Err(upstream_error_message(&err)),
        });
    }

    let alt = embed::to_alt_response(model, results);
    Ok(GatewayResponse::json(serde_json::to_vec(&alt)?))
}

async fn run_alt_image(
    state: &GatewayState,
    config: &GatewayConfig,
    mode: &AuthMode,
    body: &Bytes,
) -> Result<GatewayResponse, GatewayError> {
    let request: ImageGenerationRequestBody = parse_json(body)?;
    let model = request
        .model
        .as_deref()
        .ok_or_else(|| ProxyError::bad_request("model is required"))?;
    let model = bare_model(model).to_string();

    match image::plan_request(&request)? {
        ImagePlan::Imagen(predict) => {
            let payload = Bytes::from(serde_json::to_vec(&predict)?);
            let response =
                select_and_execute(state.store.as_ref(), config, mode, Some(&model), |key| {
                    state
                        .upstream
                        .send(state.ops.imagen_predict(&model, payload.clone(), key))
                })
                .await?;
            let bytes = response.body.into_bytes()?;
            let native: ImagenPredictResponse = parse_upstream(&bytes)?;
            let alt = image::from_imagen_response(&native);
            Ok(GatewayResponse::json(serde_json::to_vec(&alt)?))
        }
        ImagePlan::Generate(generate) => {
            let payload = Bytes::from(serde_json::to_vec(&generate)?);
            let response =
                select_and_execute(state.store.as_ref(), config, mode, Some(&model), |key| {
                    state
                        .upstream
                        .send(state.ops.generate(&model, payload.clone(), key))
                })
                .await?;
            let bytes = response.body.into_bytes()?;
            let native: GenerateContentResponse = parse_upstream(&bytes)?;
            let alt = image::from_generate_response(&native);
            Ok(GatewayResponse::json(serde_json::to_vec(&alt)?))
        }
    }
}

async fn run_alt_models(
    state: &GatewayState,
    config: &GatewayConfig,
    mode: &AuthMode,
) -> Result<GatewayResponse, GatewayError> {
    let response = select_and_execute(state.store.as_ref(), config, mode, None, |key| {
        state.upstream.send(state.ops.list_models(None, key))
    })
    .await?;
    let bytes = response.body.into_bytes()?;
    let native: ListModelsResponse = parse_upstream(&bytes)?;
    let alt = models::to_alt_models(&native);
    Ok(GatewayResponse::json(serde_json::to_vec(&alt)?))
}

/// Translate the native chunk stream into framed alt chunks, flush the
/// transformer at end of stream, and terminate with `[DONE]`.
fn alt_chat_sse_stream(upstream: ByteStream, chat_state: ChatStreamState) -> ByteStream {
    let stream = unfold(
        (
            upstream,
            SseParser::new(),
            chat_state,
            VecDeque::<Bytes>::new(),
            false,
        ),
        |(mut upstream, mut parser, mut chat_state, mut pending, mut done)| async move {
            loop {
                if let Some(frame) = pending.pop_front() {
                    return Some((Ok(frame), (upstream, parser, chat_state, pending, done)));
                }
                if done {
                    return None;
                }
                match upstream.next().await {
                    Some(Ok(bytes)) => {
                        for data in parser.push_bytes(&bytes) {
                            enqueue_alt_chunks(&mut chat_state, &data, &mut pending);
                        }
                    }
                    Some(Err(err)) => {
                        // Propagate; the client sees a truncated stream.
                        return Some((Err(err), (upstream, parser, chat_state, pending, done)));
                    }
                    None => {
                        for data in parser.finish() {
                            enqueue_alt_chunks(&mut chat_state, &data, &mut pending);
                        }
                        for chunk in chat_state.finish() {
                            push_alt_chunk(&mut pending, &chunk);
                        }
                        pending.push_back(sse_done());
                        done = true;
                    }
                }
            }
        },
    );
    Box::pin(stream)
}

fn enqueue_alt_chunks(
    chat_state: &mut ChatStreamState,
    data: &str,
    pending: &mut VecDeque<Bytes>,
) {
    if data.is_empty() || data == "[DONE]" {
        return;
    }
    match serde_json::from_str::<GenerateContentResponse>(data) {
        Ok(native) => {
            for chunk in chat_state.transform_chunk(&native) {
                push_alt_chunk(pending, &chunk);
            }
        }
        Err(err) => warn!(event = "stream_chunk_unparsed", error = %err),
    }
}

fn push_alt_chunk(
    pending: &mut VecDeque<Bytes>,
    chunk: &gemgate_protocol::openai::chat::ChatCompletionChunk,
) {
    if let Ok(json) = serde_json::to_string(chunk) {
        pending.push_back(sse_frame(&json));
    }
}

fn bare_model(model: &str) -> &str {
    model.strip_prefix("models/").unwrap_or(model)
}

fn require_model(model: Option<&str>) -> Result<&str, ProxyError> {
    model.ok_or_else(|| ProxyError::bad_request("model is required"))
}

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ProxyError> {
    if body.is_empty() {
        return Err(ProxyError::bad_request("missing request body"));
    }
    serde_json::from_slice(body).map_err(|err| ProxyError::bad_request(format!("invalid json: {err}")))
}

fn ensure_json(body: &Bytes) -> Result<(), ProxyError> {
    parse_json::<JsonValue>(body).map(|_| ())
}

fn parse_upstream<T: DeserializeOwned>(bytes: &Bytes) -> Result<T, GatewayError> {
    serde_json::from_slice(bytes).map_err(|err| {
        GatewayError::Upstream(UpstreamError::transport(format!(
            "invalid upstream response: {err}"
        )))
    })
}

fn upstream_error_message(err: &UpstreamError) -> String {
    let body = String::from_utf8_lossy(&err.body);
    if body.is_empty() {
        format!("upstream returned {}", err.status)
    } else {
        body.to_string()
    }
}

/// Strip credential query parameters before forwarding.
fn forwardable_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| !pair.is_empty() && !pair.starts_with("key="))
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept.join("&"))
    }
}

fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        "access-control-allow-origin",
        HeaderValue::from_static("*"),
    );
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,PUT,DELETE,OPTIONS,PATCH"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("Authorization, Content-Type, x-goog-api-key"),
    );
}

fn preflight_response() -> Response {
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = StatusCode::NO_CONTENT;
    apply_cors(resp.headers_mut());
    resp
}

fn final_response(response: GatewayResponse, trace_id: &str) -> Response {
    let mut resp = match response {
        GatewayResponse::Json {
            status,
            headers,
            body,
        } => {
            let mut resp = Response::new(Body::from(body));
            *resp.status_mut() = status;
            resp.headers_mut().extend(headers);
            resp
        }
        GatewayResponse::Stream {
            status,
            headers,
            body,
        } => {
            let mut resp = Response::new(Body::from_stream(body));
            *resp.status_mut() = status;
            resp.headers_mut().extend(headers);
            resp
        }
    };
    decorate(resp.headers_mut(), trace_id);
    resp
}

fn error_response(err: GatewayError, trace_id: &str) -> Response {
    let mut resp = match err {
        GatewayError::Proxy(err) => {
            let mut resp = Response::new(Body::from(err.body));
            *resp.status_mut() = err.status;
            resp.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/json; charset=utf-8"),
            );
            resp
        }
        GatewayError::Upstream(err) => {
            let mut resp = Response::new(Body::from(err.body));
            *resp.status_mut() = err.status;
            let content_type = err
                .headers
                .get(CONTENT_TYPE)
                .cloned()
                .unwrap_or(HeaderValue::from_static("application/json; charset=utf-8"));
            resp.headers_mut().insert(CONTENT_TYPE, content_type);
            resp
        }
    };
    decorate(resp.headers_mut(), trace_id);
    resp
}

fn auth_error_response(err: AuthError, trace_id: &str) -> Response {
    let mut resp = Response::new(Body::from(err.body));
    *resp.status_mut() = err.status;
    resp.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    decorate(resp.headers_mut(), trace_id);
    resp
}

fn decorate(headers: &mut HeaderMap, trace_id: &str) {
    apply_cors(headers);
    if let Ok(value) = HeaderValue::from_str(trace_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
}
