//! Drives one or more HTTP calls for a built request: pagination, batching
//! and failure classification.

use crate::errors::{ToolError, ToolErrorKind};
use crate::services::logger::Logger;
use crate::services::tool_config::{
    BatchingOptions, CompleteWhen, OnError, PaginationMode, PaginationOptions, RequestOptions,
    UpdateTarget,
};
use crate::services::transport::{AuthRef, HttpExecutor, RawResponse, RequestBody, RequestDescriptor, ResponseBody};
use crate::utils::data_path::set_path_value;
use crate::utils::expression::{to_text, ExpressionEvaluator};
use crate::utils::template::{render_condition, render_template};
use crate::utils::text::{collapse_whitespace, truncate_chars_with_marker};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ERROR_SNIPPET_CHARS: usize = 200;

#[derive(Clone)]
pub struct ExecutionEngine {
    executor: Arc<dyn HttpExecutor>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    logger: Logger,
    pagination: Option<PaginationOptions>,
    never_error: bool,
    on_error: OnError,
    custom_error: Value,
}

impl ExecutionEngine {
    pub fn new(
        executor: Arc<dyn HttpExecutor>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        logger: Logger,
        options: &RequestOptions,
    ) -> Self {
        Self {
            executor,
            evaluator,
            logger: logger.child("execute"),
            pagination: options
                .pagination
                .clone()
                .filter(|p| p.pagination_mode != PaginationMode::Off),
            never_error: options.response.never_error,
            on_error: options.on_error,
            custom_error: options.custom_error_value(),
        }
    }

    /// Executes one request, walking pages when pagination is configured.
    /// With `onError = customJson` a failed request yields the configured
    /// JSON instead of an error.
    pub async fn execute(
        &self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, ToolError> {
        let result = match self.pagination.as_ref() {
            None => match self.send_once(request, cancel).await {
                Ok(response) => self.classify(response, &[]),
                Err(err) => Err(err),
            },
            Some(pagination) => self.paginate(request, pagination, cancel).await,
        };
        match result {
            Err(err)
                if self.on_error == OnError::CustomJson
                    && matches!(err.kind, ToolErrorKind::Http | ToolErrorKind::Timeout) =>
            {
                self.logger.info(
                    "Replacing failed response with custom JSON",
                    Some(&json!({"error": err.message, "status": err.status_code})),
                );
                Ok(RawResponse::text(
                    err.status_code.unwrap_or(500),
                    "application/json",
                    self.custom_error.to_string(),
                ))
            }
            other => other,
        }
    }

    /// Runs requests grouped by `batchSize`, sequentially, pausing
    /// `batchInterval` between groups. The first failure aborts the rest.
    pub async fn execute_batch(
        &self,
        requests: &[RequestDescriptor],
        batching: Option<&BatchingOptions>,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawResponse>, ToolError> {
        let total = requests.len().max(1);
        let (size, interval) = match batching {
            None => (total, 0),
            Some(options) => {
                let size = match options.batch_size {
                    n if n < 0 => total,
                    0 => 1,
                    n => n as usize,
                };
                (size, options.batch_interval)
            }
        };
        let mut out = Vec::with_capacity(requests.len());
        for (idx, chunk) in requests.chunks(size).enumerate() {
            if idx > 0 {
                self.logger.debug(
                    "Waiting before next batch",
                    Some(&json!({"batch": idx, "interval_ms": interval})),
                );
                pause(interval, cancel).await?;
            }
            for request in chunk {
                out.push(self.execute(request, cancel).await?);
            }
        }
        Ok(out)
    }

    async fn send_once(
        &self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, ToolError> {
        if cancel.is_cancelled() {
            return Err(ToolError::cancelled("Request cancelled"));
        }
        let send = async {
            match &request.auth {
                AuthRef::CredentialType(name) => {
                    self.executor.send_with_credential_type(name, request).await
                }
                _ => self.executor.send(request).await,
            }
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(ToolError::cancelled("Request cancelled")),
            result = send => result,
        }
    }

    fn classify(&self, response: RawResponse, completion_codes: &[u16]) -> Result<RawResponse, ToolError> {
        if response.is_success()
            || self.never_error
            || completion_codes.contains(&response.status_code)
        {
            return Ok(response);
        }
        let message = failure_message(&response);
        self.logger.warn(
            "HTTP request failed",
            Some(&json!({"status": response.status_code, "message": message})),
        );
        Err(ToolError::http(Some(response.status_code), message))
    }

    async fn paginate(
        &self,
        request: &RequestDescriptor,
        pagination: &PaginationOptions,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, ToolError> {
        let completion_codes = match pagination.pagination_complete_when {
            CompleteWhen::ReceiveSpecificStatusCodes => pagination.completion_status_codes(),
            _ => Vec::new(),
        };
        let mut current = request.clone();
        let mut page_count: usize = 0;
        let mut pages: Vec<RawResponse> = Vec::new();
        let mut terminal: Option<RawResponse> = None;

        loop {
            let response = self.send_once(&current, cancel).await?;
            let response = self.classify(response, &completion_codes)?;
            page_count += 1;
            let context = page_context(&response, page_count, &current);

            let (done, keep) = match pagination.pagination_complete_when {
                CompleteWhen::ResponseIsEmpty => {
                    let empty = is_empty_response(&response);
                    (empty, !empty)
                }
                CompleteWhen::ReceiveSpecificStatusCodes => {
                    let hit = completion_codes.contains(&response.status_code);
                    (hit, !hit)
                }
                CompleteWhen::Other => (
                    render_condition(&pagination.complete_expression, &context, self.evaluator.as_ref())?,
                    true,
                ),
            };
            if keep {
                pages.push(response);
            } else {
                terminal = Some(response);
            }
            if done {
                break;
            }
            if pagination.limit_pages_fetched && page_count >= pagination.max_requests {
                self.logger.debug(
                    "Page limit reached",
                    Some(&json!({"pages": page_count, "max_requests": pagination.max_requests})),
                );
                break;
            }
            match self.next_request(&current, pagination, &context)? {
                Some(next) => current = next,
                None => break,
            }
            self.logger
                .debug("Fetching next page", Some(&json!({"page": page_count + 1})));
            pause(pagination.request_interval, cancel).await?;
        }

        if pages.is_empty() {
            pages.extend(terminal);
        }
        Ok(aggregate(pages))
    }

    /// Derives the descriptor for the following page; `None` ends pagination.
    fn next_request(
        &self,
        current: &RequestDescriptor,
        pagination: &PaginationOptions,
        context: &Value,
    ) -> Result<Option<RequestDescriptor>, ToolError> {
        match pagination.pagination_mode {
            PaginationMode::Off => Ok(None),
            PaginationMode::ResponseContainsNextUrl => {
                let rendered = render_template(&pagination.next_url, context, self.evaluator.as_ref())?;
                let url = to_text(&rendered);
                let url = url.trim();
                if !is_absolute_http_url(url) {
                    self.logger
                        .debug("Next URL is empty or not absolute", Some(&json!({"url": url})));
                    return Ok(None);
                }
                let mut next = current.clone();
                next.url = url.to_string();
                next.query.clear();
                Ok(Some(next))
            }
            PaginationMode::UpdateAParameterInEachRequest => {
                let parameters: Vec<_> = pagination
                    .parameters
                    .iter()
                    .filter(|param| !param.name.trim().is_empty())
                    .collect();
                if parameters.is_empty() {
                    return Ok(None);
                }
                let mut next = current.clone();
                for param in parameters {
                    let name = param.name.trim();
                    let value = render_template(&param.value, context, self.evaluator.as_ref())?;
                    match param.target {
                        UpdateTarget::Query => {
                            next.query.insert(name.to_string(), value);
                        }
                        UpdateTarget::Headers => {
                            let name = if next.lowercase_headers {
                                name.to_lowercase()
                            } else {
                                name.to_string()
                            };
                            next.headers.insert(name, to_text(&value));
                        }
                        UpdateTarget::Body => match &mut next.body {
                            RequestBody::Form(map) => {
                                map.insert(name.to_string(), value);
                            }
                            RequestBody::Json(body) => set_path_value(body, name, value)?,
                            RequestBody::None => {
                                let mut body = Value::Object(Default::default());
                                set_path_value(&mut body, name, value)?;
                                next.body = RequestBody::Json(body);
                            }
                        },
                    }
                }
                Ok(Some(next))
            }
        }
    }
}

async fn pause(ms: u64, cancel: &CancellationToken) -> Result<(), ToolError> {
    if ms == 0 {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(ToolError::cancelled("Cancelled while waiting")),
        _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(()),
    }
}

fn failure_message(response: &RawResponse) -> String {
    let from_json = response.body_json().and_then(|body| {
        ["message", "error", "detail"]
            .iter()
            .find_map(|key| body.get(*key).and_then(|v| v.as_str()).map(|s| s.to_string()))
    });
    let text = from_json
        .or_else(|| response.body_text().map(collapse_whitespace))
        .filter(|text| !text.is_empty());
    match text {
        Some(text) => truncate_chars_with_marker(&text, ERROR_SNIPPET_CHARS, "..."),
        None => reqwest::StatusCode::from_u16(response.status_code)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("Request failed")
            .to_string(),
    }
}

fn page_context(response: &RawResponse, page_count: usize, request: &RequestDescriptor) -> Value {
    json!({
        "$response": {
            "statusCode": response.status_code,
            "headers": response.headers_value(),
            "body": response.body_value(),
        },
        "$pageCount": page_count,
        "$request": {
            "method": request.method,
            "url": request.url,
            "qs": request.query,
            "headers": request.headers,
            "body": match &request.body {
                RequestBody::None => Value::Null,
                RequestBody::Json(value) => value.clone(),
                RequestBody::Form(map) => Value::Object(map.clone()),
            },
        },
    })
}

fn is_empty_response(response: &RawResponse) -> bool {
    match &response.body {
        ResponseBody::Binary(bytes) => bytes.is_empty(),
        ResponseBody::Text(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Null) => true,
            Ok(Value::Array(items)) => items.is_empty(),
            Ok(Value::Object(map)) => map.is_empty(),
            Ok(Value::String(inner)) => inner.trim().is_empty(),
            Ok(_) => false,
            Err(_) => text.trim().is_empty(),
        },
    }
}

fn is_absolute_http_url(raw: &str) -> bool {
    url::Url::parse(raw)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false)
}

/// One page stays as it is. Several pages keep the last status and headers;
/// JSON bodies merge into one array (page arrays flattened), anything else is
/// joined line by line. A binary page is returned alone.
fn aggregate(mut pages: Vec<RawResponse>) -> RawResponse {
    if pages.len() <= 1 {
        return pages
            .pop()
            .unwrap_or_else(|| RawResponse::text(200, "", String::new()));
    }
    if let Some(idx) = pages
        .iter()
        .position(|page| matches!(page.body, ResponseBody::Binary(_)))
    {
        return pages.swap_remove(idx);
    }
    let Some(last) = pages.last() else {
        return RawResponse::text(200, "", String::new());
    };
    let mut aggregated = RawResponse {
        status_code: last.status_code,
        headers: last.headers.clone(),
        body: ResponseBody::Text(String::new()),
        truncated: pages.iter().any(|page| page.truncated),
    };
    let bodies: Option<Vec<Value>> = pages.iter().map(|page| page.body_json()).collect();
    match bodies {
        Some(bodies) => {
            let mut items = Vec::new();
            for body in bodies {
                match body {
                    Value::Array(values) => items.extend(values),
                    other => items.push(other),
                }
            }
            aggregated
                .headers
                .insert("content-type".to_string(), "application/json".to_string());
            aggregated.body = ResponseBody::Text(Value::Array(items).to_string());
        }
        None => {
            let texts: Vec<&str> = pages.iter().filter_map(|page| page.body_text()).collect();
            aggregated.body = ResponseBody::Text(texts.join("\n"));
        }
    }
    aggregated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::tool_config::PaginationParameter;
    use crate::utils::expression::SandboxedEvaluator;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct Scripted {
        responses: Mutex<VecDeque<Result<RawResponse, ToolError>>>,
        seen: Mutex<Vec<RequestDescriptor>>,
        sent_at: Mutex<Vec<Instant>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<RawResponse, ToolError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                ..Self::default()
            })
        }

        fn seen(&self) -> Vec<RequestDescriptor> {
            self.seen.lock().unwrap().clone()
        }

        /// Time between consecutive sends.
        fn gaps(&self) -> Vec<Duration> {
            let sent_at = self.sent_at.lock().unwrap();
            sent_at.windows(2).map(|pair| pair[1] - pair[0]).collect()
        }
    }

    #[async_trait]
    impl HttpExecutor for Scripted {
        async fn send(&self, request: &RequestDescriptor) -> Result<RawResponse, ToolError> {
            self.sent_at.lock().unwrap().push(Instant::now());
            self.seen.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(RawResponse::text(200, "application/json", "[]")))
        }

        async fn send_with_credential_type(
            &self,
            _credential_type: &str,
            request: &RequestDescriptor,
        ) -> Result<RawResponse, ToolError> {
            self.send(request).await
        }
    }

    fn json_page(body: Value) -> Result<RawResponse, ToolError> {
        Ok(RawResponse::text(200, "application/json", body.to_string()))
    }

    fn engine(executor: Arc<Scripted>, options: RequestOptions) -> ExecutionEngine {
        ExecutionEngine::new(
            executor,
            Arc::new(SandboxedEvaluator::new()),
            Logger::new("test"),
            &options,
        )
    }

    fn paginated(pagination: PaginationOptions) -> RequestOptions {
        RequestOptions {
            pagination: Some(pagination),
            ..RequestOptions::default()
        }
    }

    #[tokio::test]
    async fn update_parameter_pagination_stops_on_empty_page() {
        let executor = Scripted::new(vec![
            json_page(json!([{"id": 1}, {"id": 2}])),
            json_page(json!([{"id": 3}])),
            json_page(json!([])),
        ]);
        let options = paginated(PaginationOptions {
            pagination_mode: PaginationMode::UpdateAParameterInEachRequest,
            parameters: vec![PaginationParameter {
                target: UpdateTarget::Query,
                name: "page".to_string(),
                value: "{{ $pageCount + 1 }}".to_string(),
            }],
            pagination_complete_when: CompleteWhen::ResponseIsEmpty,
            ..PaginationOptions::default()
        });
        let response = engine(executor.clone(), options)
            .execute(&RequestDescriptor::new("get", "https://api.example.com/items"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.body_json(), Some(json!([{"id": 1}, {"id": 2}, {"id": 3}])));
        let seen = executor.seen();
        assert_eq!(seen.len(), 3);
        assert!(seen[0].query.get("page").is_none());
        assert_eq!(seen[1].query["page"], json!(2));
        assert_eq!(seen[2].query["page"], json!(3));
    }

    #[tokio::test]
    async fn next_url_pagination_ends_when_url_is_missing() {
        let executor = Scripted::new(vec![
            json_page(json!({"items": [1], "next": "https://api.example.com/items?cursor=b"})),
            json_page(json!({"items": [2], "next": null})),
        ]);
        let options = paginated(PaginationOptions {
            pagination_mode: PaginationMode::ResponseContainsNextUrl,
            next_url: "{{ $response.body.next }}".to_string(),
            pagination_complete_when: CompleteWhen::Other,
            complete_expression: "{{ $response.body.next == null }}".to_string(),
            ..PaginationOptions::default()
        });
        let mut request = RequestDescriptor::new("GET", "https://api.example.com/items");
        request.query.insert("limit".to_string(), json!(1));
        let response = engine(executor.clone(), options)
            .execute(&request, &CancellationToken::new())
            .await
            .unwrap();
        let seen = executor.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].url, "https://api.example.com/items?cursor=b");
        assert!(seen[1].query.is_empty());
        assert_eq!(
            response.body_json(),
            Some(json!([
                {"items": [1], "next": "https://api.example.com/items?cursor=b"},
                {"items": [2], "next": null}
            ]))
        );
    }

    #[tokio::test]
    async fn page_limit_caps_requests() {
        let executor = Scripted::new(
            (0..10).map(|i| json_page(json!([i]))).collect(),
        );
        let options = paginated(PaginationOptions {
            pagination_mode: PaginationMode::UpdateAParameterInEachRequest,
            parameters: vec![PaginationParameter {
                target: UpdateTarget::Headers,
                name: "X-Page".to_string(),
                value: "{{ $pageCount }}".to_string(),
            }],
            limit_pages_fetched: true,
            max_requests: 3,
            ..PaginationOptions::default()
        });
        let response = engine(executor.clone(), options)
            .execute(&RequestDescriptor::new("GET", "https://api.example.com"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(executor.seen().len(), 3);
        assert_eq!(executor.seen()[2].header("x-page"), Some("2"));
        assert_eq!(response.body_json(), Some(json!([0, 1, 2])));
    }

    #[tokio::test]
    async fn completion_status_code_ends_pagination_without_failing() {
        let executor = Scripted::new(vec![
            json_page(json!({"n": 1})),
            Ok(RawResponse::text(404, "text/plain", "no more")),
        ]);
        let options = paginated(PaginationOptions {
            pagination_mode: PaginationMode::UpdateAParameterInEachRequest,
            parameters: vec![PaginationParameter {
                target: UpdateTarget::Body,
                name: "cursor.page".to_string(),
                value: "{{ $pageCount }}".to_string(),
            }],
            pagination_complete_when: CompleteWhen::ReceiveSpecificStatusCodes,
            status_codes_when_complete: "404, 410".to_string(),
            ..PaginationOptions::default()
        });
        let response = engine(executor.clone(), options)
            .execute(&RequestDescriptor::new("POST", "https://api.example.com"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.body_json(), Some(json!({"n": 1})));
        assert_eq!(
            executor.seen()[1].body,
            RequestBody::Json(json!({"cursor": {"page": 1}}))
        );
    }

    #[tokio::test]
    async fn non_success_status_is_an_http_error() {
        let executor = Scripted::new(vec![Ok(RawResponse::text(
            503,
            "application/json",
            json!({"message": "Service down"}).to_string(),
        ))]);
        let err = engine(executor, RequestOptions::default())
            .execute(&RequestDescriptor::new("GET", "https://api.example.com"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.status_code, Some(503));
        assert_eq!(err.to_agent_text(), "HTTP 503: Service down");
    }

    #[tokio::test]
    async fn custom_json_replaces_failures() {
        let executor = Scripted::new(vec![Err(ToolError::http(Some(500), "Connection refused"))]);
        let options = RequestOptions {
            on_error: OnError::CustomJson,
            custom_error_json: json!({"ok": false}),
            ..RequestOptions::default()
        };
        let response = engine(executor, options)
            .execute(&RequestDescriptor::new("GET", "https://api.example.com"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.body_json(), Some(json!({"ok": false})));
    }

    #[tokio::test]
    async fn never_error_passes_failures_through() {
        let executor = Scripted::new(vec![Ok(RawResponse::text(500, "text/plain", "boom"))]);
        let mut options = RequestOptions::default();
        options.response.never_error = true;
        let response = engine(executor, options)
            .execute(&RequestDescriptor::new("GET", "https://api.example.com"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status_code, 500);
    }

    #[tokio::test]
    async fn batches_run_in_order() {
        let executor = Scripted::new(vec![json_page(json!(1)), json_page(json!(2)), json_page(json!(3))]);
        let options = RequestOptions::default();
        let requests: Vec<RequestDescriptor> = (1..=3)
            .map(|i| RequestDescriptor::new("GET", &format!("https://api.example.com/{}", i)))
            .collect();
        let batching = BatchingOptions {
            batch_size: 2,
            batch_interval: 1,
        };
        let responses = engine(executor.clone(), options)
            .execute_batch(&requests, Some(&batching), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(responses.len(), 3);
        let urls: Vec<String> = executor.seen().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://api.example.com/1",
                "https://api.example.com/2",
                "https://api.example.com/3"
            ]
        );
    }

    fn numbered_requests(count: usize) -> Vec<RequestDescriptor> {
        (1..=count)
            .map(|i| RequestDescriptor::new("GET", &format!("https://api.example.com/{}", i)))
            .collect()
    }

    const BATCH_INTERVAL_MS: u64 = 300;
    const NO_WAIT: Duration = Duration::from_millis(250);

    #[tokio::test]
    async fn negative_batch_size_sends_everything_in_one_batch() {
        let executor = Scripted::new(vec![]);
        let batching = BatchingOptions {
            batch_size: -1,
            batch_interval: BATCH_INTERVAL_MS,
        };
        let started = Instant::now();
        let responses = engine(executor.clone(), RequestOptions::default())
            .execute_batch(&numbered_requests(4), Some(&batching), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(responses.len(), 4);
        assert_eq!(executor.seen().len(), 4);
        assert!(started.elapsed() < NO_WAIT);
    }

    #[tokio::test]
    async fn zero_batch_size_waits_between_every_request() {
        let executor = Scripted::new(vec![]);
        let batching = BatchingOptions {
            batch_size: 0,
            batch_interval: BATCH_INTERVAL_MS,
        };
        engine(executor.clone(), RequestOptions::default())
            .execute_batch(&numbered_requests(3), Some(&batching), &CancellationToken::new())
            .await
            .unwrap();
        let gaps = executor.gaps();
        assert_eq!(gaps.len(), 2);
        assert!(gaps
            .iter()
            .all(|gap| *gap >= Duration::from_millis(BATCH_INTERVAL_MS)));
    }

    #[tokio::test]
    async fn batch_interval_applies_only_between_batches() {
        let executor = Scripted::new(vec![]);
        let batching = BatchingOptions {
            batch_size: 2,
            batch_interval: BATCH_INTERVAL_MS,
        };
        engine(executor.clone(), RequestOptions::default())
            .execute_batch(&numbered_requests(4), Some(&batching), &CancellationToken::new())
            .await
            .unwrap();
        let gaps = executor.gaps();
        assert_eq!(gaps.len(), 3);
        assert!(gaps[0] < NO_WAIT);
        assert!(gaps[1] >= Duration::from_millis(BATCH_INTERVAL_MS));
        assert!(gaps[2] < NO_WAIT);
    }

    fn cancel_soon() -> CancellationToken {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        cancel
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait_between_batches() {
        let executor = Scripted::new(vec![]);
        let batching = BatchingOptions {
            batch_size: 1,
            batch_interval: 60_000,
        };
        let cancel = cancel_soon();
        let engine = engine(executor.clone(), RequestOptions::default());
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            engine.execute_batch(&numbered_requests(2), Some(&batching), &cancel),
        )
        .await
        .expect("wait is interrupted")
        .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Cancelled);
        assert_eq!(executor.seen().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait_between_pages() {
        let executor = Scripted::new(vec![json_page(json!([{"id": 1}]))]);
        let options = paginated(PaginationOptions {
            pagination_mode: PaginationMode::UpdateAParameterInEachRequest,
            parameters: vec![PaginationParameter {
                target: UpdateTarget::Query,
                name: "page".to_string(),
                value: "{{ $pageCount + 1 }}".to_string(),
            }],
            pagination_complete_when: CompleteWhen::ResponseIsEmpty,
            request_interval: 60_000,
            ..PaginationOptions::default()
        });
        let cancel = cancel_soon();
        let engine = engine(executor.clone(), options);
        let request = RequestDescriptor::new("GET", "https://api.example.com/items");
        let err = tokio::time::timeout(Duration::from_secs(5), engine.execute(&request, &cancel))
            .await
            .expect("wait is interrupted")
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Cancelled);
        assert_eq!(executor.seen().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_before_sending() {
        let executor = Scripted::new(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine(executor.clone(), RequestOptions::default())
            .execute(&RequestDescriptor::new("GET", "https://api.example.com"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Cancelled);
        assert!(executor.seen().is_empty());
    }

    #[test]
    fn mixed_pages_join_as_text() {
        let pages = vec![
            RawResponse::text(200, "text/plain", "first"),
            RawResponse::text(200, "application/json", "{\"a\":1}"),
        ];
        let merged = aggregate(pages);
        assert_eq!(merged.body_text(), Some("first\n{\"a\":1}"));
    }
}
