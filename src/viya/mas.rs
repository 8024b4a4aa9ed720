//! Micro-analytic score (MAS) REST client.
//!
//! Every request asks the token provider for a bearer token first, so a
//! [`TokenManager`](super::auth::token_manager::TokenManager) in front of the
//! client credentials flow keeps the number of logins down to one per token
//! lifetime.

use std::collections::HashSet;

use reqwest::{
    header::{ACCEPT, CONTENT_TYPE},
    Method,
};
use serde_json::Value;
use tracing::{debug, info};

use super::{
    auth::{self, Token},
    utils::{check_status, ServerError},
};

pub use self::model::{Module, Parameter, Step};

/// One input row: column name to value.
pub type Record = serde_json::Map<String, Value>;

/// Step outputs merged with the inputs that produced them.
pub type ScoredRecord = serde_json::Map<String, Value>;

const STEP_INPUT_TYPE: &str = "application/vnd.sas.microanalytic.module.step.input+json";
const STEP_OUTPUT_TYPE: &str = "application/vnd.sas.microanalytic.module.step.output+json";

pub struct MicroanalyticScore<AuthTokenProvider> {
    pub client: reqwest::Client,
    /// Platform base URL without a trailing slash.
    pub base_url: String,
    pub auth_token_provider: AuthTokenProvider,
}

#[derive(Debug, thiserror::Error)]
pub enum Error<AuthError> {
    #[error("auth: {0}")]
    Auth(#[source] AuthError),
    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("server: {0}")]
    Server(#[from] ServerError),
    #[error("no steps found for module {0:?}")]
    NoSteps(String),
    #[error("paging loop: next link {0:?} was already visited")]
    RepeatedLink(String),
}

impl<AuthTokenProvider> MicroanalyticScore<AuthTokenProvider>
where
    AuthTokenProvider: auth::TokenProvider,
{
    fn build_url(&self, path: &str) -> String {
        format!("{}/microanalyticScore{}", self.base_url, path)
    }

    /// Collection `next` links are usually relative to the host.
    fn resolve_link(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_owned()
        } else {
            format!("{}{}", self.base_url, href)
        }
    }

    fn build_request(
        &self,
        auth_token: &str,
        method: Method,
        url: &str,
    ) -> reqwest::RequestBuilder {
        self.client.request(method, url).bearer_auth(auth_token)
    }

    async fn get_auth_token(&self) -> Result<String, Error<AuthTokenProvider::Error>> {
        let token = self
            .auth_token_provider
            .get_auth_token()
            .await
            .map_err(Error::Auth)?;
        Ok(token.access_token().to_owned())
    }

    async fn exec(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, Error<AuthTokenProvider::Error>> {
        let request = request.build()?;
        debug!(message = "Sending request", method = %request.method(), url = %request.url());
        let res = self.client.execute(request).await?;
        let res = check_status(res).await?;
        Ok(res)
    }

    async fn get_json<T>(&self, url: &str) -> Result<T, Error<AuthTokenProvider::Error>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let auth_token = self.get_auth_token().await?;
        let res = self
            .exec(
                self.build_request(&auth_token, Method::GET, url)
                    .header(ACCEPT, "application/json"),
            )
            .await?;
        let value = res.json().await?;
        Ok(value)
    }

    /// Fetch a collection, following `next` links until the last page.
    async fn list_all<T>(&self, url: &str) -> Result<Vec<T>, Error<AuthTokenProvider::Error>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let page: model::List<T> = self.get_json(url).await?;
        let mut next_link = page.next_link().map(str::to_owned);
        let mut items = page.items;
        let mut visited = HashSet::from([url.to_owned()]);

        while let Some(href) = next_link {
            let next_url = self.resolve_link(&href);
            if !visited.insert(next_url.clone()) {
                return Err(Error::RepeatedLink(href));
            }
            let page: model::List<T> = self.get_json(&next_url).await?;
            next_link = page.next_link().map(str::to_owned);
            items.extend(page.items);
        }

        Ok(items)
    }

    /// Names of all published modules.
    pub async fn list_modules(&self) -> Result<Vec<String>, Error<AuthTokenProvider::Error>> {
        let url = self.build_url("/modules/");
        let modules: Vec<model::ModuleSummary> = self.list_all(&url).await?;
        Ok(modules.into_iter().map(|module| module.name).collect())
    }

    /// Module details, or `None` when the module does not exist.
    pub async fn get_module(
        &self,
        module: &str,
    ) -> Result<Option<Module>, Error<AuthTokenProvider::Error>> {
        let url = self.build_url(&format!("/modules/{}", module));
        match self.get_json(&url).await {
            Ok(module) => Ok(Some(module)),
            Err(Error::Server(ServerError { status_code, .. })) if status_code == 404 => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn list_steps(
        &self,
        module: &str,
    ) -> Result<Vec<Step>, Error<AuthTokenProvider::Error>> {
        let url = self.build_url(&format!("/modules/{}/steps", module));
        self.list_all(&url).await
    }

    /// The `score` step if the module has one, otherwise its first step.
    pub async fn score_step_id(
        &self,
        module: &str,
    ) -> Result<String, Error<AuthTokenProvider::Error>> {
        let steps = self.list_steps(module).await?;
        let step = pick_score_step(&steps).ok_or_else(|| Error::NoSteps(module.to_owned()))?;
        Ok(step.id.clone())
    }

    pub async fn execute_step(
        &self,
        module: &str,
        step: &str,
        record: &Record,
    ) -> Result<ScoredRecord, Error<AuthTokenProvider::Error>> {
        let auth_token = self.get_auth_token().await?;
        let url = self.build_url(&format!("/modules/{}/steps/{}", module, step));

        let input = model::StepInput::from_record(record);
        let request = self
            .build_request(&auth_token, Method::POST, &url)
            .header(CONTENT_TYPE, STEP_INPUT_TYPE)
            .header(ACCEPT, STEP_OUTPUT_TYPE)
            .json(&input);

        let res = self.exec(request).await?;
        let output: model::StepOutput = res.json().await?;
        Ok(merge_outputs(output, input))
    }

    /// Resolve the scoring step once, then run every record through it in order.
    pub async fn score_records(
        &self,
        module: &str,
        records: &[Record],
    ) -> Result<Vec<ScoredRecord>, Error<AuthTokenProvider::Error>> {
        let step = self.score_step_id(module).await?;
        info!(message = "Scoring records", module, step = %step, records = records.len());

        let mut scored = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            debug!(message = "Scoring record", index = index + 1, total = records.len());
            scored.push(self.execute_step(module, &step, record).await?);
        }
        Ok(scored)
    }
}

fn pick_score_step(steps: &[Step]) -> Option<&Step> {
    steps
        .iter()
        .find(|step| step.id.eq_ignore_ascii_case("score"))
        .or_else(|| steps.first())
}

fn merge_outputs(output: model::StepOutput, input: model::StepInput) -> ScoredRecord {
    output
        .outputs
        .into_iter()
        .chain(input.inputs)
        .map(|pair| (pair.name, pair.value))
        .collect()
}

mod model {
    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    use super::Record;

    #[derive(Default, Debug, Clone, PartialEq, Deserialize)]
    pub struct List<T> {
        #[serde(default = "Vec::new")]
        pub items: Vec<T>,
        #[serde(default)]
        pub links: Vec<Link>,
    }

    impl<T> List<T> {
        pub fn next_link(&self) -> Option<&str> {
            self.links
                .iter()
                .find(|link| link.rel == "next")
                .map(|link| link.href.as_str())
        }
    }

    #[derive(Default, Debug, Clone, PartialEq, Deserialize)]
    pub struct Link {
        pub rel: String,
        pub href: String,
    }

    #[derive(Default, Debug, Clone, PartialEq, Deserialize)]
    pub struct ModuleSummary {
        pub name: String,
    }

    #[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Module {
        pub id: String,
        #[serde(default)]
        pub name: Option<String>,
        #[serde(default)]
        pub description: Option<String>,
        #[serde(default)]
        pub step_ids: Vec<String>,
    }

    #[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Step {
        pub id: String,
        #[serde(default)]
        pub inputs: Vec<Parameter>,
        #[serde(default)]
        pub outputs: Vec<Parameter>,
    }

    #[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Parameter {
        pub name: String,
        #[serde(rename = "type", default)]
        pub kind: Option<String>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct NameValue {
        pub name: String,
        #[serde(default)]
        pub value: Value,
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct StepInput {
        pub inputs: Vec<NameValue>,
    }

    impl StepInput {
        /// Step input names are lowercase.
        pub fn from_record(record: &Record) -> Self {
            let inputs = record
                .iter()
                .map(|(name, value)| NameValue {
                    name: name.to_lowercase(),
                    value: value.clone(),
                })
                .collect();
            Self { inputs }
        }
    }

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    pub struct StepOutput {
        #[serde(default)]
        pub outputs: Vec<NameValue>,
    }
}
