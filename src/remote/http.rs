//! HTTP document-store client: per-user `treatments` and `doses` collections
//! under `/users/{uid}/...`, documents addressed by id.

use std::time::Duration;

use super::{DoseDoc, RemoteError, RemoteStore, TreatmentDoc};

const DEFAULT_TIMEOUT_SECS: u64 = 15;

pub struct HttpRemoteStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn doc_url(&self, user_id: &str, collection: &str, doc_id: &str) -> String {
        format!("{}/users/{user_id}/{collection}/{doc_id}", self.base_url)
    }

    fn collection_url(&self, user_id: &str, collection: &str) -> String {
        format!("{}/users/{user_id}/{collection}", self.base_url)
    }

    async fn put_doc<T: serde::Serialize>(
        &self,
        url: &str,
        doc: &T,
    ) -> Result<(), RemoteError> {
        self.client
            .put(url)
            .json(doc)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete_doc(&self, url: &str) -> Result<(), RemoteError> {
        let response = self.client.delete(url).send().await?;
        // A document already gone is a success for our purposes.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        response.error_for_status()?;
        Ok(())
    }

    async fn fetch_collection<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<Vec<T>, RemoteError> {
        let docs = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<T>>()
            .await?;
        Ok(docs)
    }
}

impl RemoteStore for HttpRemoteStore {
    async fn put_treatment(
        &self,
        user_id: &str,
        doc_id: &str,
        doc: &TreatmentDoc,
    ) -> Result<(), RemoteError> {
        self.put_doc(&self.doc_url(user_id, "treatments", doc_id), doc)
            .await
    }

    async fn delete_treatment(&self, user_id: &str, doc_id: &str) -> Result<(), RemoteError> {
        self.delete_doc(&self.doc_url(user_id, "treatments", doc_id))
            .await
    }

    async fn fetch_treatments(&self, user_id: &str) -> Result<Vec<TreatmentDoc>, RemoteError> {
        self.fetch_collection(&self.collection_url(user_id, "treatments"))
            .await
    }

    async fn put_dose(
        &self,
        user_id: &str,
        doc_id: &str,
        doc: &DoseDoc,
    ) -> Result<(), RemoteError> {
        self.put_doc(&self.doc_url(user_id, "doses", doc_id), doc)
            .await
    }

    async fn delete_dose(&self, user_id: &str, doc_id: &str) -> Result<(), RemoteError> {
        self.delete_doc(&self.doc_url(user_id, "doses", doc_id))
            .await
    }

    async fn fetch_doses(&self, user_id: &str) -> Result<Vec<DoseDoc>, RemoteError> {
        self.fetch_collection(&self.collection_url(user_id, "doses"))
            .await
    }
}
