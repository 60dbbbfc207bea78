use crate::bigquery::auth::{Authenticator, CredentialSource};
use crate::crux::config::BigQueryConfig;
use crate::crux::month::YearMonth;
use crate::crux::query::{MonthQuery, ResultSet};
use crate::crux::scope::{Scope, ScopeSpec};
use crate::error::ArchiveError;
use crate::logging;
use anyhow::Result;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use std::cell::OnceCell;
use std::env;
use std::thread;
use std::time::Duration;

/// Server-side wait per `jobs.query` / `getQueryResults` call.
const SERVER_WAIT_MS: u64 = 10_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryPage {
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    #[serde(default)]
    page_token: Option<String>,
}

pub fn build_query_request(
    spec: &ScopeSpec,
    month: YearMonth,
    cfg: &BigQueryConfig,
) -> Value {
    let mut body = json!({
        "query": spec.sql,
        "useLegacySql": false,
        "parameterMode": "POSITIONAL",
        "queryParameters": [
            {
                "parameterType": {"type": "INT64"},
                "parameterValue": {"value": month.as_param().to_string()}
            }
        ],
        "maxResults": cfg.page_size,
        "timeoutMs": SERVER_WAIT_MS,
    });
    if let Some(location) = &cfg.location {
        body["location"] = Value::String(location.clone());
    }
    body
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn append_page(out: &mut ResultSet, page: &QueryPage) {
    if out.columns.is_empty()
        && let Some(schema) = &page.schema
    {
        out.columns = schema.fields.iter().map(|f| f.name.clone()).collect();
    }
    for row in &page.rows {
        out.rows.push(row.f.iter().map(|cell| cell_text(&cell.v)).collect());
    }
}

/// Pulls `error.message` out of a Google API error body.
pub fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

fn decode_page(response: Response, what: &str) -> Result<QueryPage, ArchiveError> {
    let status = response.status();
    let body = response
        .text()
        .map_err(|err| ArchiveError::remote(format!("{what}: failed to read body: {err}")))?;
    if !status.is_success() {
        return Err(ArchiveError::RemoteQuery(format!(
            "{what} returned {status}: {}",
            api_error_message(&body)
        )));
    }
    serde_json::from_str(&body)
        .map_err(|err| ArchiveError::remote(format!("{what}: malformed response: {err}")))
}

/// BigQuery REST client for the popularity tables.
pub struct BigQueryClient {
    http: Client,
    cfg: BigQueryConfig,
    auth: Authenticator,
    project: OnceCell<String>,
}

impl BigQueryClient {
    pub fn new(source: CredentialSource, cfg: BigQueryConfig) -> Result<Self> {
        let auth = Authenticator::new(source)?;
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            cfg,
            auth,
            project: OnceCell::new(),
        })
    }

    pub fn credential_label(&self) -> String {
        self.auth.source().label()
    }

    fn project_id(&self) -> Result<String, ArchiveError> {
        if let Some(project) = self.project.get() {
            return Ok(project.clone());
        }
        let resolved = match &self.cfg.project_id {
            Some(project) => project.clone(),
            None => self
                .auth
                .project_hint()?
                .or_else(|| env::var("GOOGLE_CLOUD_PROJECT").ok())
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| {
                    ArchiveError::Configuration(
                        "no billing project; set CRUX_PROJECT_ID or [bigquery] project_id"
                            .to_string(),
                    )
                })?,
        };
        let _ = self.project.set(resolved.clone());
        Ok(resolved)
    }

    fn endpoint(&self) -> &str {
        self.cfg.endpoint.trim_end_matches('/')
    }

    fn start_query(&self, spec: &ScopeSpec, month: YearMonth) -> Result<QueryPage, ArchiveError> {
        let project = self.project_id()?;
        let token = self.auth.access_token(&self.http)?;
        let url = format!("{}/projects/{project}/queries", self.endpoint());
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&build_query_request(spec, month, &self.cfg))
            .send()
            .map_err(|err| ArchiveError::remote(format!("jobs.query {url}: {err}")))?;
        decode_page(response, "jobs.query")
    }

    fn query_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryPage, ArchiveError> {
        let token = self.auth.access_token(&self.http)?;
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.endpoint(),
            job.project_id,
            job.job_id
        );
        let mut params = vec![
            ("maxResults", self.cfg.page_size.to_string()),
            ("timeoutMs", SERVER_WAIT_MS.to_string()),
        ];
        if let Some(location) = job.location.as_ref().or(self.cfg.location.as_ref()) {
            params.push(("location", location.clone()));
        }
        if let Some(page_token) = page_token {
            params.push(("pageToken", page_token.to_string()));
        }
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&params)
            .send()
            .map_err(|err| ArchiveError::remote(format!("getQueryResults {url}: {err}")))?;
        decode_page(response, "getQueryResults")
    }

    fn run(&self, spec: &ScopeSpec, month: YearMonth) -> Result<ResultSet, ArchiveError> {
        logging::debug(&format!("querying {} for {month}", spec.table));
        let first = self.start_query(spec, month)?;
        collect_pages(
            spec,
            first,
            Duration::from_millis(self.cfg.poll_interval_ms),
            |job, page_token| self.query_results(job, page_token),
        )
    }
}

/// Drives one query to completion: polls while the job is running, then
/// follows `pageToken` until the last page.
fn collect_pages<F>(
    spec: &ScopeSpec,
    mut page: QueryPage,
    poll: Duration,
    mut next_page: F,
) -> Result<ResultSet, ArchiveError>
where
    F: FnMut(&JobReference, Option<&str>) -> Result<QueryPage, ArchiveError>,
{
    let mut out = ResultSet::default();
    let job = page.job_reference.take();
    loop {
        let next = if page.job_complete {
            append_page(&mut out, &page);
            match page.page_token.take() {
                Some(token) => Some(token),
                None => break,
            }
        } else {
            None
        };

        let job = job.as_ref().ok_or_else(|| {
            ArchiveError::remote("jobs.query response carried no jobReference".to_string())
        })?;
        match &next {
            Some(_) => logging::debug(&format!("{} rows so far, next page", out.len())),
            None => {
                logging::debug(&format!("job {} still running", job.job_id));
                thread::sleep(poll);
            }
        }
        page = next_page(job, next.as_deref())?;
    }

    if out.columns.is_empty() {
        out.columns = spec.columns.iter().map(|c| c.to_string()).collect();
    }
    Ok(out)
}

impl MonthQuery for BigQueryClient {
    fn fetch(&self, scope: Scope, month: YearMonth) -> Result<ResultSet> {
        Ok(self.run(scope.spec(), month)?)
    }
}

#[cfg(test)]
mod tests {
    use super::{QueryPage, api_error_message, append_page, build_query_request, collect_pages};
    use crate::crux::config::BigQueryConfig;
    use crate::crux::month::YearMonth;
    use crate::crux::query::ResultSet;
    use crate::crux::scope::Scope;
    use crate::error::ArchiveError;
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::time::Duration;

    fn page(value: Value) -> QueryPage {
        serde_json::from_value(value).expect("query page")
    }

    #[test]
    fn request_binds_month_as_single_int64_parameter() {
        let cfg = BigQueryConfig::default();
        let body = build_query_request(
            Scope::Global.spec(),
            YearMonth::new(2023, 5).unwrap(),
            &cfg,
        );
        assert_eq!(body["parameterMode"], "POSITIONAL");
        assert_eq!(body["useLegacySql"], false);
        let params = body["queryParameters"].as_array().expect("params");
        assert_eq!(params.len(), 1);
        assert_eq!(params[0]["parameterType"]["type"], "INT64");
        assert_eq!(params[0]["parameterValue"]["value"], "202305");
        assert!(body["query"].as_str().unwrap().contains("experimental.global"));
        assert!(body.get("location").is_none());
    }

    #[test]
    fn request_carries_configured_location() {
        let cfg = BigQueryConfig {
            location: Some("US".to_string()),
            ..BigQueryConfig::default()
        };
        let body = build_query_request(
            Scope::Country.spec(),
            YearMonth::new(2022, 1).unwrap(),
            &cfg,
        );
        assert_eq!(body["location"], "US");
    }

    #[test]
    fn pages_append_in_server_order_with_schema_columns() {
        let first: QueryPage = serde_json::from_value(json!({
            "jobComplete": true,
            "jobReference": {"projectId": "p", "jobId": "j", "location": "US"},
            "schema": {"fields": [{"name": "origin"}, {"name": "rank"}]},
            "rows": [
                {"f": [{"v": "https://a.example"}, {"v": "1000"}]},
                {"f": [{"v": "https://b.example"}, {"v": "1000"}]}
            ],
            "pageToken": "next"
        }))
        .expect("page one");
        let second: QueryPage = serde_json::from_value(json!({
            "jobComplete": true,
            "rows": [{"f": [{"v": "https://c.example"}, {"v": null}]}]
        }))
        .expect("page two");

        let mut out = ResultSet::default();
        append_page(&mut out, &first);
        append_page(&mut out, &second);
        assert_eq!(out.columns, vec!["origin", "rank"]);
        assert_eq!(out.len(), 3);
        assert_eq!(out.rows[2], vec!["https://c.example".to_string(), String::new()]);
        assert_eq!(first.page_token.as_deref(), Some("next"));
    }

    #[test]
    fn incomplete_job_page_has_no_rows() {
        let page: QueryPage = serde_json::from_value(json!({
            "jobComplete": false,
            "jobReference": {"projectId": "p", "jobId": "j"}
        }))
        .expect("page");
        assert!(!page.job_complete);
        assert!(page.rows.is_empty());
    }

    #[test]
    fn api_error_message_prefers_google_error_body() {
        let body = r#"{"error":{"code":403,"message":"Access Denied: Project p"}}"#;
        assert_eq!(api_error_message(body), "Access Denied: Project p");
        assert_eq!(api_error_message("  bad gateway "), "bad gateway");
    }

    #[test]
    fn running_job_is_polled_then_pages_are_followed() {
        let first = page(json!({
            "jobComplete": false,
            "jobReference": {"projectId": "p", "jobId": "j1", "location": "US"}
        }));
        let mut canned: VecDeque<QueryPage> = VecDeque::from([
            page(json!({"jobComplete": false})),
            page(json!({
                "jobComplete": true,
                "schema": {"fields": [{"name": "origin"}, {"name": "rank"}]},
                "rows": [{"f": [{"v": "https://a.example"}, {"v": "1000"}]}],
                "pageToken": "t1"
            })),
            page(json!({
                "jobComplete": true,
                "rows": [{"f": [{"v": "https://b.example"}, {"v": "5000"}]}]
            })),
        ]);
        let mut seen = Vec::new();

        let out = collect_pages(Scope::Global.spec(), first, Duration::ZERO, |job, token| {
            seen.push((job.job_id.clone(), token.map(str::to_string)));
            Ok(canned.pop_front().expect("no more canned pages"))
        })
        .expect("collect");

        assert_eq!(
            seen,
            vec![
                ("j1".to_string(), None),
                ("j1".to_string(), None),
                ("j1".to_string(), Some("t1".to_string())),
            ]
        );
        assert!(canned.is_empty());
        assert_eq!(out.columns, vec!["origin", "rank"]);
        assert_eq!(
            out.rows,
            vec![
                vec!["https://a.example".to_string(), "1000".to_string()],
                vec!["https://b.example".to_string(), "5000".to_string()],
            ]
        );
    }

    #[test]
    fn complete_first_page_needs_no_follow_up_call() {
        let first = page(json!({"jobComplete": true, "totalRows": "0"}));
        let out = collect_pages(Scope::Country.spec(), first, Duration::ZERO, |_, _| {
            panic!("no follow-up expected")
        })
        .expect("collect");
        assert!(out.is_empty());
        assert_eq!(out.columns, vec!["country_code", "origin", "rank"]);
    }

    #[test]
    fn running_job_without_reference_is_remote_error() {
        let first = page(json!({"jobComplete": false}));
        let err = collect_pages(Scope::Global.spec(), first, Duration::ZERO, |_, _| {
            panic!("no follow-up expected")
        })
        .unwrap_err();
        assert!(matches!(err, ArchiveError::RemoteQuery(_)));
    }
}
