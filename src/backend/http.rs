//! HTTP implementation of the backend contract

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::trace;

use super::{
    Acknowledged, Backend, BackendError, LiveValue, PersistRequest, PersistResponse, PortList,
    PresetList, PresetResult, StageRequest, StageResponse,
};
use crate::state::PushMessage;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpBackend {
    client: Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let base =
            Url::parse(base_url).map_err(|_| BackendError::InvalidUrl(base_url.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl(base_url.to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> Result<Url, BackendError> {
        self.base
            .join(path)
            .map_err(|_| BackendError::InvalidUrl(format!("{}{}", self.base, path)))
    }

    async fn checked(response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::BadStatus { status, body })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        trace!("GET {}", path);
        let response = self.client.get(self.url(path)?).send().await?;
        Ok(Self::checked(response).await?.json().await?)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Response, BackendError> {
        trace!("POST {}", path);
        let response = self.client.post(self.url(path)?).json(body).send().await?;
        Self::checked(response).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, BackendError> {
        Ok(self.post(path, body).await?.json().await?)
    }

    fn require_accepted<T: Acknowledged>(response: T) -> Result<T, BackendError> {
        match response.refusal() {
            Some(error) => Err(BackendError::Rejected(error)),
            None => Ok(response),
        }
    }

    fn require_ok(result: PresetResult) -> Result<PresetResult, BackendError> {
        if result.ok {
            Ok(result)
        } else {
            Err(BackendError::Rejected(
                result.error.unwrap_or_else(|| "request not accepted".to_string()),
            ))
        }
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_snapshot(&self) -> Result<PushMessage, BackendError> {
        self.get_json("/api/state").await
    }

    async fn list_ports(&self) -> Result<PortList, BackendError> {
        self.get_json("/api/ports").await
    }

    async fn change_bank(&self, bank: u8) -> Result<(), BackendError> {
        self.post("/api/bank", &json!({ "bank": bank })).await?;
        Ok(())
    }

    async fn apply_live_value(&self, value: LiveValue) -> Result<(), BackendError> {
        self.post("/api/midi", &value).await?;
        Ok(())
    }

    async fn stage_mapping(&self, request: &StageRequest) -> Result<StageResponse, BackendError> {
        let response = self.post_json("/api/mapping/temp", request).await?;
        Self::require_accepted(response)
    }

    async fn persist_mapping(
        &self,
        request: &PersistRequest,
    ) -> Result<PersistResponse, BackendError> {
        let response = self.post_json("/api/mapping", request).await?;
        Self::require_accepted(response)
    }

    async fn list_presets(&self) -> Result<PresetList, BackendError> {
        self.get_json("/api/presets").await
    }

    async fn load_preset(&self, name: &str) -> Result<PresetResult, BackendError> {
        let result = self
            .post_json("/api/presets/load", &json!({ "name": name }))
            .await?;
        Self::require_ok(result)
    }

    async fn save_preset(&self, name: Option<&str>) -> Result<PresetResult, BackendError> {
        let body = match name {
            Some(name) => json!({ "name": name }),
            None => json!({}),
        };
        let result = self.post_json("/api/presets/save", &body).await?;
        Self::require_ok(result)
    }

    async fn download_preset(&self, name: &str) -> Result<Bytes, BackendError> {
        let mut url = self.url("/api/presets/download")?;
        url.query_pairs_mut().append_pair("name", name);
        trace!("GET {}", url);
        let response = self.client.get(url).send().await?;
        Ok(Self::checked(response).await?.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn backend(server: &mockito::ServerGuard) -> HttpBackend {
        HttpBackend::new(&server.url(), DEFAULT_TIMEOUT).unwrap()
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        assert!(matches!(
            HttpBackend::new("not a url", DEFAULT_TIMEOUT),
            Err(BackendError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_snapshot() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/state")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"state":{"current_bank":2,"banks":{}},"mapping":{"1":{"1":14}},"dirty":true,"preset":"init.json"}"#,
            )
            .create_async()
            .await;

        let snapshot = backend(&server).fetch_snapshot().await.unwrap();
        assert_eq!(snapshot.state.current_bank, 2);
        assert_eq!(snapshot.dirty, Some(true));
        assert_eq!(snapshot.preset.as_deref(), Some("init.json"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_stage_mapping_posts_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/mapping/temp")
            .match_body(Matcher::Json(serde_json::json!({
                "bank": 2, "encoder": 5, "cc": 10, "channel": 3
            })))
            .with_status(200)
            .with_body(r#"{"mapping":{"2":{"5":10}},"channels":{"2":{"5":3}}}"#)
            .create_async()
            .await;

        let request = StageRequest {
            bank: 2,
            encoder: 5,
            cc: 10,
            channel: Some(3),
            label: None,
        };
        let response = backend(&server).stage_mapping(&request).await.unwrap();
        assert!(response.mapping.is_some());
        assert!(response.channels.is_some());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_live_value_and_bank_change() {
        let mut server = mockito::Server::new_async().await;
        let midi = server
            .mock("POST", "/api/midi")
            .match_body(Matcher::Json(serde_json::json!({
                "type": "control_change", "control": 1, "value": 99, "channel": 0
            })))
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;
        let bank = server
            .mock("POST", "/api/bank")
            .match_body(Matcher::Json(serde_json::json!({ "bank": 3 })))
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let backend = backend(&server);
        let cc = crate::midi::decode(&[0xB0, 1, 99]).unwrap();
        backend.apply_live_value(cc.into()).await.unwrap();
        backend.change_bank(3).await.unwrap();
        midi.assert_async().await;
        bank.assert_async().await;
    }

    #[tokio::test]
    async fn test_mapping_not_ok_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/mapping/temp")
            .with_status(200)
            .with_body(r#"{"ok":false,"error":"cc out of range"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/api/mapping")
            .with_status(200)
            .with_body(r#"{"ok":false}"#)
            .create_async()
            .await;

        let backend = backend(&server);
        let stage = StageRequest {
            bank: 1,
            encoder: 1,
            cc: 10,
            channel: None,
            label: None,
        };
        let err = backend.stage_mapping(&stage).await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected(ref msg) if msg == "cc out of range"));

        let persist = PersistRequest {
            bank: 1,
            encoder: 1,
            cc: 10,
            label: None,
        };
        let err = backend.persist_mapping(&persist).await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected(ref msg) if msg == "request not accepted"));
    }

    #[tokio::test]
    async fn test_mapping_ok_true_is_accepted() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/mapping")
            .with_status(200)
            .with_body(r#"{"ok":true,"mapping":{"1":{"1":10}}}"#)
            .create_async()
            .await;

        let persist = PersistRequest {
            bank: 1,
            encoder: 1,
            cc: 10,
            label: None,
        };
        let response = backend(&server).persist_mapping(&persist).await.unwrap();
        assert!(response.mapping.is_some());
    }

    #[tokio::test]
    async fn test_load_preset_not_ok_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/presets/load")
            .with_status(200)
            .with_body(r#"{"ok":false,"error":"not found"}"#)
            .create_async()
            .await;

        let err = backend(&server).load_preset("missing").await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected(ref msg) if msg == "not found"));
    }

    #[tokio::test]
    async fn test_save_without_name_sends_empty_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/presets/save")
            .match_body(Matcher::Json(serde_json::json!({})))
            .with_status(200)
            .with_body(r#"{"ok":true,"preset":"init.json"}"#)
            .create_async()
            .await;

        let result = backend(&server).save_preset(None).await.unwrap();
        assert_eq!(result.preset.as_deref(), Some("init.json"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_maps_to_bad_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/presets")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let err = backend(&server).list_presets().await.unwrap_err();
        match err {
            BackendError::BadStatus { status, body } => {
                assert_eq!(status.as_u16(), 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_download_preset_returns_raw_bytes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/presets/download")
            .match_query(Matcher::UrlEncoded("name".into(), "a b.json".into()))
            .with_status(200)
            .with_body(r#"{"banks":{}}"#)
            .create_async()
            .await;

        let bytes = backend(&server).download_preset("a b.json").await.unwrap();
        assert_eq!(&bytes[..], br#"{"banks":{}}"#);
        mock.assert_async().await;
    }
}
