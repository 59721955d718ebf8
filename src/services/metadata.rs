//! Token metadata: Metaplex account decoding, the static registry fallback,
//! and content-identifier extraction for off-chain JSON.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::str::FromStr;

use crate::fetch::FetchError;

/// Metaplex Token Metadata program.
pub const TOKEN_METADATA_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s");

/// Placeholder image used when nothing better resolves.
pub const DEFAULT_IMAGE_URL: &str =
    "https://s3.coinmarketcap.com/static-gravity/image/5cc0b99a8dd84fbfa4e150d84b5531f2.png";

const GATEWAY_PREFIXES: [&str; 4] = [
    "https://cf-ipfs.com/ipfs/",
    "https://ipfs.io/ipfs/",
    "https://nftstorage.link/ipfs/",
    "ipfs://",
];

/// CIDv0 (`Qm` + 44 base58 chars) or CIDv1 (`baf` + 56 base32 chars).
static CID_SEGMENT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^(?:Qm[1-9A-HJ-NP-Za-km-z]{44}|baf[a-z2-7]{56})$").ok());

/// Metadata account address for a mint.
pub fn metadata_address(mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[b"metadata", TOKEN_METADATA_PROGRAM_ID.as_ref(), mint.as_ref()],
        &TOKEN_METADATA_PROGRAM_ID,
    )
    .0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStandard {
    NonFungible,
    FungibleAsset,
    Fungible,
    NonFungibleEdition,
    ProgrammableNonFungible,
    ProgrammableNonFungibleEdition,
}

impl TokenStandard {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::NonFungible),
            1 => Some(Self::FungibleAsset),
            2 => Some(Self::Fungible),
            3 => Some(Self::NonFungibleEdition),
            4 => Some(Self::ProgrammableNonFungible),
            5 => Some(Self::ProgrammableNonFungibleEdition),
            _ => None,
        }
    }

    pub fn is_non_fungible(self) -> bool {
        matches!(
            self,
            Self::NonFungible
                | Self::NonFungibleEdition
                | Self::ProgrammableNonFungible
                | Self::ProgrammableNonFungibleEdition
        )
    }
}

/// Fields of a Metaplex metadata account this crate uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainMetadata {
    pub mint: Pubkey,
    pub name: String,
    pub symbol: String,
    pub uri: String,
    pub token_standard: Option<TokenStandard>,
    pub collection: Option<Pubkey>,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn pubkey(&mut self) -> Option<Pubkey> {
        self.take(32).and_then(|b| Pubkey::try_from(b).ok())
    }

    fn string(&mut self) -> Option<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        Some(
            String::from_utf8_lossy(bytes)
                .trim_end_matches('\0')
                .trim()
                .to_string(),
        )
    }

    fn option_tag(&mut self) -> Option<bool> {
        match self.u8()? {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }
    }
}

impl OnChainMetadata {
    /// Decode a metadata account. Accounts written before token standards
    /// and collections existed simply end early; those fields are `None`.
    pub fn decode(data: &[u8]) -> Result<Self, FetchError> {
        let mut c = Cursor { data, pos: 0 };
        let bad = |what: &str| FetchError::Decode(format!("metadata account: {what}"));

        let key = c.u8().ok_or_else(|| bad("empty"))?;
        if key != 4 {
            return Err(bad("not a MetadataV1 account"));
        }
        let _update_authority = c.pubkey().ok_or_else(|| bad("update authority"))?;
        let mint = c.pubkey().ok_or_else(|| bad("mint"))?;
        let name = c.string().ok_or_else(|| bad("name"))?;
        let symbol = c.string().ok_or_else(|| bad("symbol"))?;
        let uri = c.string().ok_or_else(|| bad("uri"))?;
        let _seller_fee_basis_points = c.take(2).ok_or_else(|| bad("seller fee"))?;
        if c.option_tag().ok_or_else(|| bad("creators"))? {
            let count = c.u32().ok_or_else(|| bad("creator count"))? as usize;
            // address + verified + share
            c.take(count.saturating_mul(34)).ok_or_else(|| bad("creators"))?;
        }

        let mut tail = || -> Option<(Option<TokenStandard>, Option<Pubkey>)> {
            let _primary_sale_happened = c.u8()?;
            let _is_mutable = c.u8()?;
            if c.option_tag()? {
                let _edition_nonce = c.u8()?;
            }
            let token_standard = if c.option_tag()? {
                TokenStandard::from_u8(c.u8()?)
            } else {
                None
            };
            let collection = match c.option_tag() {
                Some(true) => {
                    let _verified = c.u8()?;
                    c.pubkey()
                }
                _ => None,
            };
            Some((token_standard, collection))
        };
        let (token_standard, collection) = tail().unwrap_or((None, None));

        Ok(Self {
            mint,
            name,
            symbol,
            uri,
            token_standard,
            collection,
        })
    }
}

/// Well-known mint entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub mint: String,
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub image: Option<String>,
}

/// Static symbol/name registry consulted when no usable on-chain metadata
/// exists.
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    entries: HashMap<Pubkey, RegistryEntry>,
}

impl TokenRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.extend([
            ("So11111111111111111111111111111111111111112", "Wrapped SOL", "SOL"),
            ("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", "USD Coin", "USDC"),
            ("Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB", "USDT", "USDT"),
            ("8Ki8DpuWNxu9VsS3kQbarsCWMcFGWkzzA8pUPto9zBd5", "LOCK IN", "LOCKIN"),
        ]
        .into_iter()
        .map(|(mint, name, symbol)| RegistryEntry {
            mint: mint.to_string(),
            name: name.to_string(),
            symbol: symbol.to_string(),
            image: None,
        }));
        registry
    }

    /// Add entries; ones with an unparsable mint are ignored.
    pub fn extend(&mut self, entries: impl IntoIterator<Item = RegistryEntry>) {
        for entry in entries {
            match Pubkey::from_str(&entry.mint) {
                Ok(mint) => {
                    self.entries.insert(mint, entry);
                }
                Err(_) => tracing::warn!(mint = %entry.mint, "Ignoring registry entry with invalid mint"),
            }
        }
    }

    pub fn get(&self, mint: &Pubkey) -> Option<&RegistryEntry> {
        self.entries.get(mint)
    }
}

/// Where a holding's human metadata came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataSource {
    OnChain,
    Registry,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMetadata {
    pub source: MetadataSource,
    pub name: String,
    pub symbol: String,
    /// Off-chain JSON location (on-chain source only).
    pub uri: Option<String>,
    /// Image known without fetching (registry source only).
    pub image: Option<String>,
    pub token_standard: Option<TokenStandard>,
    pub collection: Option<Pubkey>,
}

/// Fallback chain: on-chain account with a name, then the registry, then
/// the mint address itself. Token standard and collection always come from
/// the on-chain account when one exists.
pub fn resolve_metadata(
    mint: &Pubkey,
    on_chain: Option<&OnChainMetadata>,
    registry: &TokenRegistry,
) -> ResolvedMetadata {
    let token_standard = on_chain.and_then(|m| m.token_standard);
    let collection = on_chain.and_then(|m| m.collection);

    if let Some(meta) = on_chain.filter(|m| !m.name.is_empty()) {
        return ResolvedMetadata {
            source: MetadataSource::OnChain,
            name: meta.name.clone(),
            symbol: meta.symbol.clone(),
            uri: Some(meta.uri.clone()).filter(|u| !u.is_empty()),
            image: None,
            token_standard,
            collection,
        };
    }

    if let Some(entry) = registry.get(mint) {
        return ResolvedMetadata {
            source: MetadataSource::Registry,
            name: entry.name.clone(),
            symbol: entry.symbol.clone(),
            uri: None,
            image: entry.image.clone(),
            token_standard,
            collection,
        };
    }

    let mint_str = mint.to_string();
    ResolvedMetadata {
        source: MetadataSource::Default,
        symbol: mint_str.chars().take(4).collect(),
        name: mint_str,
        uri: None,
        image: None,
        token_standard,
        collection,
    }
}

/// Content identifier (optionally followed by a path) embedded in a
/// metadata URI, if any.
pub fn extract_cid(uri: &str) -> Option<String> {
    let uri = uri.trim();
    if uri.is_empty() {
        return None;
    }
    for prefix in GATEWAY_PREFIXES {
        if let Some(rest) = uri.strip_prefix(prefix) {
            return Some(rest.to_string()).filter(|s| !s.is_empty());
        }
    }
    uri.split('/')
        .find(|segment| {
            CID_SEGMENT
                .as_ref()
                .is_some_and(|re| re.is_match(segment))
        })
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::metadata_account;

    const CID_V0: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";
    const CID_V1: &str = "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi";

    fn encode(mint: &Pubkey, name: &str, standard: Option<u8>, collection: Option<Pubkey>) -> Vec<u8> {
        metadata_account(mint, name, "SYM", "https://arweave.net/abc", standard, collection)
    }

    #[test]
    fn test_decode_nft_with_collection() {
        let mint = Pubkey::new_unique();
        let collection = Pubkey::new_unique();
        let data = encode(&mint, "Mad Lad #1", Some(4), Some(collection));
        let meta = OnChainMetadata::decode(&data).unwrap();
        assert_eq!(meta.mint, mint);
        assert_eq!(meta.name, "Mad Lad #1");
        assert_eq!(meta.symbol, "SYM");
        assert_eq!(meta.uri, "https://arweave.net/abc");
        assert_eq!(meta.token_standard, Some(TokenStandard::ProgrammableNonFungible));
        assert!(meta.token_standard.unwrap().is_non_fungible());
        assert_eq!(meta.collection, Some(collection));
    }

    #[test]
    fn test_decode_truncated_legacy_account() {
        let mint = Pubkey::new_unique();
        let mut data = encode(&mint, "Old", None, None);
        // cut right after the creators block
        data.truncate(1 + 32 + 32 + (4 + 32) + (4 + 10) + (4 + 200) + 2 + 1 + 4 + 34);
        let meta = OnChainMetadata::decode(&data).unwrap();
        assert_eq!(meta.name, "Old");
        assert_eq!(meta.token_standard, None);
        assert_eq!(meta.collection, None);
    }

    #[test]
    fn test_decode_rejects_wrong_key() {
        assert!(OnChainMetadata::decode(&[1, 2, 3]).is_err());
        assert!(OnChainMetadata::decode(&[]).is_err());
    }

    #[test]
    fn test_fungible_standard_is_not_nft() {
        assert!(!TokenStandard::Fungible.is_non_fungible());
        assert!(!TokenStandard::FungibleAsset.is_non_fungible());
        assert!(TokenStandard::NonFungibleEdition.is_non_fungible());
    }

    #[test]
    fn test_resolution_chain() {
        let registry = TokenRegistry::with_defaults();
        let usdc = Pubkey::from_str("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v").unwrap();

        let on_chain = OnChainMetadata {
            mint: usdc,
            name: "USD Coin".into(),
            symbol: "USDC".into(),
            uri: String::new(),
            token_standard: Some(TokenStandard::Fungible),
            collection: None,
        };
        let resolved = resolve_metadata(&usdc, Some(&on_chain), &registry);
        assert_eq!(resolved.source, MetadataSource::OnChain);
        assert_eq!(resolved.uri, None);

        let nameless = OnChainMetadata { name: String::new(), ..on_chain };
        let resolved = resolve_metadata(&usdc, Some(&nameless), &registry);
        assert_eq!(resolved.source, MetadataSource::Registry);
        assert_eq!(resolved.symbol, "USDC");
        assert_eq!(resolved.token_standard, Some(TokenStandard::Fungible));

        let unknown = Pubkey::new_unique();
        let resolved = resolve_metadata(&unknown, None, &registry);
        assert_eq!(resolved.source, MetadataSource::Default);
        assert_eq!(resolved.name, unknown.to_string());
        assert_eq!(resolved.symbol.len(), 4);
    }

    #[test]
    fn test_extract_cid_prefixes() {
        assert_eq!(
            extract_cid(&format!("https://ipfs.io/ipfs/{CID_V0}")).as_deref(),
            Some(CID_V0)
        );
        assert_eq!(
            extract_cid(&format!("https://cf-ipfs.com/ipfs/{CID_V0}/1.json")),
            Some(format!("{CID_V0}/1.json"))
        );
        assert_eq!(extract_cid(&format!("ipfs://{CID_V1}")).as_deref(), Some(CID_V1));
        assert_eq!(
            extract_cid(&format!("https://nftstorage.link/ipfs/{CID_V1}")).as_deref(),
            Some(CID_V1)
        );
    }

    #[test]
    fn test_extract_cid_from_path_segment() {
        assert_eq!(
            extract_cid(&format!("https://{CID_V1}.ipfs.dweb.link/")).as_deref(),
            None
        );
        assert_eq!(
            extract_cid(&format!("https://gateway.pinata.cloud/ipfs/{CID_V0}")).as_deref(),
            Some(CID_V0)
        );
        assert_eq!(extract_cid("https://arweave.net/abc"), None);
        assert_eq!(extract_cid(""), None);
    }

    #[test]
    fn test_metadata_address_is_deterministic() {
        let mint = Pubkey::new_unique();
        assert_eq!(metadata_address(&mint), metadata_address(&mint));
        assert_ne!(metadata_address(&mint), metadata_address(&Pubkey::new_unique()));
    }
}
