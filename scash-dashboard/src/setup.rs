//! First-run setup form.
//!
//! Holds the user's draft configuration, keeps the coin, implementation
//! and pool choices consistent with each other, and validates the draft
//! before anything is sent to the backend.
//!
//! The choices come from a [`Catalog`]. Implementations declare which
//! coins they can mine; pool presets declare which coin they serve.
//! Changing the coin re-picks a matching pool preset and, if the current
//! implementation cannot mine the new coin, the first one that can.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api_client::types::SetupRequest;

/// Pool selector value meaning "use the custom text field".
pub const POOL_CUSTOM: &str = "custom";

/// Coin that always mines against a user-supplied pool.
pub const COIN_CUSTOM_RX: &str = "custom_rx";

/// Input rejected before any request was made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("钱包地址不能为空")]
    EmptyWallet,

    #[error("请选择矿池或填写自定义矿池地址")]
    EmptyPool,

    #[error("线程数必须是正整数")]
    InvalidThreads,

    #[error("不支持的币种：{0}")]
    UnknownCoin(String),

    #[error("矿工程序 {impl_name} 不支持币种 {coin}")]
    ImplUnavailable { impl_name: String, coin: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct CoinOption {
    pub value: String,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ImplOption {
    pub value: String,
    pub label: String,
    /// Coins this implementation can mine. Empty means any coin.
    #[serde(default)]
    pub coins: Vec<String>,
}

impl ImplOption {
    pub fn supports(&self, coin: &str) -> bool {
        self.coins.is_empty() || self.coins.iter().any(|c| c == coin)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct PoolPreset {
    /// Pool URL sent to the backend when this preset is chosen.
    pub value: String,
    pub label: String,
    /// Coin this pool serves, if it is tied to one.
    #[serde(default)]
    pub coin: Option<String>,
}

/// Choices offered by the setup form.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Catalog {
    pub coins: Vec<CoinOption>,
    pub impls: Vec<ImplOption>,
    pub pools: Vec<PoolPreset>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            coins: vec![
                CoinOption {
                    value: "scash".into(),
                    label: "SCASH (RandomX)".into(),
                },
                CoinOption {
                    value: COIN_CUSTOM_RX.into(),
                    label: "自定义 RandomX".into(),
                },
            ],
            impls: vec![
                ImplOption {
                    value: "cpuminer".into(),
                    label: "cpuminer".into(),
                    coins: vec!["scash".into(), COIN_CUSTOM_RX.into()],
                },
                ImplOption {
                    value: "srbminer".into(),
                    label: "SRBMiner-Multi".into(),
                    coins: vec!["scash".into()],
                },
            ],
            pools: vec![PoolPreset {
                value: "stratum+tcp://pool.scash.pro:8888".into(),
                label: "pool.scash.pro".into(),
                coin: Some("scash".into()),
            }],
        }
    }
}

impl Catalog {
    pub fn coin(&self, value: &str) -> Option<&CoinOption> {
        self.coins.iter().find(|c| c.value == value)
    }

    pub fn pool(&self, value: &str) -> Option<&PoolPreset> {
        self.pools.iter().find(|p| p.value == value)
    }

    /// Implementations offered for `coin`, in catalog order.
    pub fn impls_for<'a>(&'a self, coin: &'a str) -> impl Iterator<Item = &'a ImplOption> + 'a {
        self.impls.iter().filter(move |i| i.supports(coin))
    }

    fn default_pool_for(&self, coin: &str) -> PoolChoice {
        if coin == COIN_CUSTOM_RX {
            return PoolChoice::Custom;
        }
        self.pools
            .iter()
            .find(|p| p.coin.as_deref() == Some(coin))
            .map_or(PoolChoice::Custom, |p| PoolChoice::Preset(p.value.clone()))
    }
}

/// State of the pool selector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoolChoice {
    Preset(String),
    Custom,
}

/// The draft configuration being edited.
///
/// Only user input mutates it. It is replaced by a fresh default after a
/// successful submit or reset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetupForm {
    pub coin: String,
    pub impl_name: String,
    pub wallet: String,
    pub pool: PoolChoice,
    pub pool_custom: String,
    pub bin_path: String,
    pub threads_raw: String,
}

impl SetupForm {
    /// A blank form with the catalog's default selections.
    pub fn new(catalog: &Catalog) -> Self {
        let coin = catalog
            .coins
            .first()
            .map(|c| c.value.clone())
            .unwrap_or_default();
        let impl_name = catalog
            .impls_for(&coin)
            .next()
            .map(|i| i.value.clone())
            .unwrap_or_default();

        Self {
            pool: catalog.default_pool_for(&coin),
            coin,
            impl_name,
            wallet: String::new(),
            pool_custom: String::new(),
            bin_path: String::new(),
            threads_raw: String::new(),
        }
    }

    pub fn pool_is_custom(&self) -> bool {
        self.pool == PoolChoice::Custom
    }

    /// Switch coin and re-pick a compatible pool and implementation.
    pub fn select_coin(&mut self, catalog: &Catalog, coin: &str) -> Result<(), ValidationError> {
        if catalog.coin(coin).is_none() {
            return Err(ValidationError::UnknownCoin(coin.to_owned()));
        }
        self.coin = coin.to_owned();
        self.pool = catalog.default_pool_for(coin);

        let current_ok = catalog
            .impls
            .iter()
            .any(|i| i.value == self.impl_name && i.supports(coin));
        if !current_ok {
            if let Some(first) = catalog.impls_for(coin).next() {
                self.impl_name = first.value.clone();
            }
        }
        Ok(())
    }

    /// Pick an implementation. Only ones offered for the current coin are
    /// accepted.
    pub fn select_impl(&mut self, catalog: &Catalog, impl_name: &str) -> Result<(), ValidationError> {
        if catalog.impls_for(&self.coin).any(|i| i.value == impl_name) {
            self.impl_name = impl_name.to_owned();
            Ok(())
        } else {
            Err(ValidationError::ImplUnavailable {
                impl_name: impl_name.to_owned(),
                coin: self.coin.clone(),
            })
        }
    }

    /// Set the pool selector.
    ///
    /// Anything that is not a known preset switches to custom entry, and
    /// a non-sentinel value lands in the custom field so it stays
    /// editable.
    pub fn select_pool(&mut self, catalog: &Catalog, value: &str) {
        if value == POOL_CUSTOM {
            self.pool = PoolChoice::Custom;
        } else if catalog.pool(value).is_some() {
            self.pool = PoolChoice::Preset(value.to_owned());
        } else {
            self.pool = PoolChoice::Custom;
            if !value.trim().is_empty() {
                self.pool_custom = value.to_owned();
            }
        }
    }

    /// Pool URL the form currently resolves to.
    pub fn resolved_pool_url(&self) -> &str {
        match &self.pool {
            PoolChoice::Preset(value) => value.trim(),
            PoolChoice::Custom => self.pool_custom.trim(),
        }
    }

    /// Check the draft and build the request body.
    pub fn validate(&self) -> Result<SetupRequest, ValidationError> {
        let wallet = self.wallet.trim();
        if wallet.is_empty() {
            return Err(ValidationError::EmptyWallet);
        }

        let pool_url = self.resolved_pool_url();
        if pool_url.is_empty() {
            return Err(ValidationError::EmptyPool);
        }

        let threads = parse_threads(&self.threads_raw)?;

        Ok(SetupRequest {
            coin: self.coin.clone(),
            impl_name: self.impl_name.clone(),
            wallet: wallet.to_owned(),
            pool_url: pool_url.to_owned(),
            bin_path: self.bin_path.trim().to_owned(),
            threads,
        })
    }
}

/// Empty means "let the backend decide"; anything else must be a
/// positive integer.
fn parse_threads(raw: &str) -> Result<Option<u32>, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<u32>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err(ValidationError::InvalidThreads),
    }
}
