use super::{
    KeyAttribute, Profile, ProfileStore, ScanPage, StoreError, StoreKey,
    PROFILE_IMAGE_URL_ATTRIBUTE,
};
use crate::config::StoreConfig;
use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::config::Builder as DynamoConfigBuilder;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::operation::scan::builders::ScanFluentBuilder;
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

type Item = HashMap<String, AttributeValue>;

/// Profile store backed by a DynamoDB table keyed on a single string attribute.
pub struct DynamoProfileStore {
    client: DynamoClient,
    table: String,
    primary_key: String,
    page_size: Option<i32>,
}

impl DynamoProfileStore {
    /// Create a store with a client built from the ambient AWS configuration
    pub async fn new(config: &StoreConfig) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut dynamo_config_builder = DynamoConfigBuilder::from(&aws_config);

        // Custom endpoint for LocalStack / DynamoDB Local
        if let Some(ref endpoint_url) = config.endpoint_url {
            dynamo_config_builder = dynamo_config_builder.endpoint_url(endpoint_url);
        }

        let client = DynamoClient::from_conf(dynamo_config_builder.build());

        info!(
            table = %config.table,
            region = %config.region,
            primary_key = %config.primary_key,
            "DynamoDB profile store initialized"
        );

        Ok(Self::from_client(
            client,
            &config.table,
            &config.primary_key,
            config.page_size,
        ))
    }

    pub fn from_client(
        client: DynamoClient,
        table: impl Into<String>,
        primary_key: impl Into<String>,
        page_size: Option<i32>,
    ) -> Self {
        Self {
            client,
            table: table.into(),
            primary_key: primary_key.into(),
            page_size,
        }
    }

    /// Readiness check: a one-item scan, needing no permission beyond listing.
    fn ping_request(&self) -> ScanFluentBuilder {
        self.client.scan().table_name(&self.table).limit(1)
    }

    fn item_to_profile(&self, item: &Item) -> Result<Profile, StoreError> {
        let handle = string_attribute(item, &self.primary_key)?;
        let profile_image_url = string_attribute(item, PROFILE_IMAGE_URL_ATTRIBUTE)?;
        Ok(Profile {
            handle,
            profile_image_url,
        })
    }
}

#[async_trait]
impl ProfileStore for DynamoProfileStore {
    #[instrument(skip(self), fields(table = %self.table))]
    async fn get(&self, handle: &str) -> Result<Option<Profile>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key(&self.primary_key, AttributeValue::S(handle.to_string()))
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(DisplayErrorContext(&e).to_string()))?;

        output.item().map(|item| self.item_to_profile(item)).transpose()
    }

    #[instrument(skip(self, profile), fields(table = %self.table, handle = %profile.handle))]
    async fn put(&self, profile: &Profile) -> Result<(), StoreError> {
        self.client
            .put_item()
            .table_name(&self.table)
            .item(&self.primary_key, AttributeValue::S(profile.handle.clone()))
            .item(
                PROFILE_IMAGE_URL_ATTRIBUTE,
                AttributeValue::S(profile.profile_image_url.clone()),
            )
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(DisplayErrorContext(&e).to_string()))?;

        debug!("Profile written");
        Ok(())
    }

    #[instrument(skip(self, start_after), fields(table = %self.table, resumed = start_after.is_some()))]
    async fn scan(&self, start_after: Option<StoreKey>) -> Result<ScanPage, StoreError> {
        let output = self
            .client
            .scan()
            .table_name(&self.table)
            .set_limit(self.page_size)
            .set_exclusive_start_key(start_after.map(|key| key_to_item(&key)))
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(DisplayErrorContext(&e).to_string()))?;

        let items = output
            .items()
            .iter()
            .map(|item| self.item_to_profile(item))
            .collect::<Result<Vec<_>, _>>()?;

        let next_key = output.last_evaluated_key().map(item_to_key).transpose()?;

        debug!(
            count = items.len(),
            has_more = next_key.is_some(),
            "Scan page read"
        );

        Ok(ScanPage { items, next_key })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.ping_request()
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }
}

fn string_attribute(item: &Item, name: &str) -> Result<String, StoreError> {
    item.get(name)
        .and_then(|value| value.as_s().ok())
        .cloned()
        .ok_or_else(|| StoreError::Corrupt(format!("item is missing string attribute {name}")))
}

fn key_to_item(key: &StoreKey) -> Item {
    key.iter()
        .map(|(name, value)| {
            let value = match value {
                KeyAttribute::S(s) => AttributeValue::S(s.clone()),
                KeyAttribute::N(n) => AttributeValue::N(n.clone()),
                KeyAttribute::B(b) => AttributeValue::B(Blob::new(b.clone())),
            };
            (name.clone(), value)
        })
        .collect()
}

fn item_to_key(item: &Item) -> Result<StoreKey, StoreError> {
    item.iter()
        .map(|(name, value)| {
            let value = match value {
                AttributeValue::S(s) => KeyAttribute::S(s.clone()),
                AttributeValue::N(n) => KeyAttribute::N(n.clone()),
                AttributeValue::B(b) => KeyAttribute::B(b.as_ref().to_vec()),
                other => {
                    return Err(StoreError::Corrupt(format!(
                        "unsupported key attribute type for {name}: {other:?}"
                    )))
                }
            };
            Ok((name.clone(), value))
        })
        .collect()
}
