//! Property-based tests for sealed link tokens.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use proptest::prelude::*;
use tt_downloader::{
    LinkSealer, TokenError,
    media::{DownloadData, MediaKind},
    token::{NONCE_LEN, TAG_LEN},
};

const NOW: i64 = 1_700_000_000;

fn media_kind() -> impl Strategy<Value = MediaKind> {
    prop_oneof![
        Just(MediaKind::Mp3),
        Just(MediaKind::Video),
        Just(MediaKind::Image),
    ]
}

fn download_data() -> impl Strategy<Value = DownloadData> {
    ("https://[a-z]{1,12}\\.example/[a-zA-Z0-9/_-]{0,40}", "\\PC{1,24}", media_kind())
        .prop_map(|(url, author, kind)| DownloadData { url, author, kind })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_structured_payload_round_trips(
        data in download_data(),
        secret in "\\PC{1,64}",
        ttl in 1u64..=86_400,
    ) {
        let sealer = LinkSealer::new(&secret);
        let envelope = sealer.seal_at(&data, ttl, NOW).unwrap();
        let opened: DownloadData = sealer.unseal_at(&envelope, NOW).unwrap();
        prop_assert_eq!(opened, data);
    }

    #[test]
    fn prop_bare_string_round_trips(payload in "\\PC*", ttl in 1u64..=86_400) {
        let sealer = LinkSealer::new("overflow");
        let envelope = sealer.seal_at(payload.as_str(), ttl, NOW).unwrap();
        let opened: String = sealer.unseal_at(&envelope, NOW).unwrap();
        prop_assert_eq!(opened, payload);
    }

    #[test]
    fn prop_envelopes_never_repeat(data in download_data()) {
        let sealer = LinkSealer::new("overflow");
        let first = sealer.seal_at(&data, 360, NOW).unwrap();
        let second = sealer.seal_at(&data, 360, NOW).unwrap();
        prop_assert_ne!(first, second);
    }

    #[test]
    fn prop_envelope_is_url_safe(data in download_data()) {
        let envelope = LinkSealer::new("overflow").seal_at(&data, 360, NOW).unwrap();
        prop_assert!(envelope
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
    }

    #[test]
    fn prop_any_bit_flip_is_rejected(
        data in download_data(),
        position in any::<prop::sample::Index>(),
        mask in 1u8..=255,
    ) {
        let sealer = LinkSealer::new("overflow");
        let envelope = sealer.seal_at(&data, 360, NOW).unwrap();
        let mut raw = URL_SAFE_NO_PAD.decode(&envelope).unwrap();
        prop_assert!(raw.len() > NONCE_LEN + TAG_LEN);

        let index = position.index(raw.len());
        raw[index] ^= mask;
        let tampered = URL_SAFE_NO_PAD.encode(&raw);

        let result = sealer.unseal_at::<DownloadData>(&tampered, NOW);
        prop_assert_eq!(result, Err(TokenError::Integrity));
    }

    #[test]
    fn prop_truncation_is_rejected(data in download_data(), keep in 0usize..64) {
        let sealer = LinkSealer::new("overflow");
        let envelope = sealer.seal_at(&data, 360, NOW).unwrap();
        let raw = URL_SAFE_NO_PAD.decode(&envelope).unwrap();
        let truncated = URL_SAFE_NO_PAD.encode(&raw[..keep.min(raw.len() - 1)]);

        let result = sealer.unseal_at::<DownloadData>(&truncated, NOW);
        prop_assert!(matches!(result, Err(TokenError::Decode(_) | TokenError::Integrity)));
    }

    #[test]
    fn prop_wrong_secret_is_rejected(
        data in download_data(),
        issuing in "[a-z0-9]{1,32}",
        redeeming in "[a-z0-9]{1,32}",
    ) {
        prop_assume!(issuing != redeeming);
        let envelope = LinkSealer::new(&issuing).seal_at(&data, 360, NOW).unwrap();
        let result = LinkSealer::new(&redeeming).unseal_at::<DownloadData>(&envelope, NOW);
        prop_assert_eq!(result, Err(TokenError::Integrity));
    }

    #[test]
    fn prop_expiry_boundary(ttl in 1u64..=100_000, elapsed in 0u64..=200_000) {
        let sealer = LinkSealer::new("overflow");
        let envelope = sealer.seal_at("https://www.tiktok.com/@a/photo/1", ttl, NOW).unwrap();
        let result = sealer.unseal_at::<String>(&envelope, NOW + elapsed as i64);

        if elapsed <= ttl {
            prop_assert!(result.is_ok());
        } else {
            prop_assert_eq!(result, Err(TokenError::Expired { expired_at: NOW + ttl as i64 }));
        }
    }

    #[test]
    fn prop_arbitrary_input_never_opens(input in "\\PC{0,200}") {
        let result = LinkSealer::new("overflow").unseal_at::<serde_json::Value>(&input, NOW);
        prop_assert!(matches!(result, Err(TokenError::Decode(_) | TokenError::Integrity)));
    }
}
