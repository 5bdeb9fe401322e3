//! Direct uploads, asset management and the read path through the depot.

mod common;

use common::*;
use larder_core::path::{ALTERNATIVE_ORIGINS_PATH, DOMAINS_PATH};
use larder_core::{
    Caller, CommitBatch, DAPP_COLLECTION, EncodingType, ListMatcher, ListParams, Permission,
    SetRule, UploadChunk,
};
use larder_store::{CommittedUpload, ErrorKind, HttpRequest, StoreError, verify_response};
use time::OffsetDateTime;

fn live_version(committed: CommittedUpload) -> u64 {
    match committed {
        CommittedUpload::Live { asset } => asset.version,
        other => panic!("expected a live asset, got {other:?}"),
    }
}

#[test]
fn test_direct_upload_versions_are_monotonic() {
    let (mut depot, signer) = test_depot();
    let ci = writer();
    let key = || init_key(IMAGES, "/logo.svg", EncodingType::Identity);

    let v1 = live_version(upload(&mut depot, &ci, key(), None, b"<svg/>", 4, None).unwrap());
    assert_eq!(v1, 1);

    let stale = upload(&mut depot, &ci, key(), None, b"<svg></svg>", 4, None).unwrap_err();
    assert!(matches!(stale, StoreError::VersionMismatch { current: Some(1), .. }));
    assert_eq!(stale.kind(), ErrorKind::Concurrency);

    let v2 = live_version(upload(&mut depot, &ci, key(), None, b"<svg></svg>", 4, Some(1)).unwrap());
    assert_eq!(v2, 2);

    let response = depot.http_request(&HttpRequest::get("/logo.svg"));
    assert_eq!(response.status_code, 200);
    assert_eq!(response.header("content-type"), Some("image/svg+xml"));
    verify_response(signer.public_key(), "/logo.svg", &response, b"<svg></svg>", 2).unwrap();
}

#[test]
fn test_identity_commit_replaces_other_encodings() {
    let (mut depot, _signer) = test_depot();
    let ci = writer();
    upload(&mut depot, &ci, init_key(IMAGES, "/app.js", EncodingType::Identity), None, b"js", 8, None).unwrap();
    upload(&mut depot, &ci, init_key(IMAGES, "/app.js", EncodingType::Gzip), None, b"gz", 8, Some(1)).unwrap();
    assert_eq!(depot.assets().get(IMAGES, "/app.js").unwrap().encodings.len(), 2);

    upload(&mut depot, &ci, init_key(IMAGES, "/app.js", EncodingType::Identity), None, b"js2", 8, Some(2)).unwrap();
    let asset = depot.assets().get(IMAGES, "/app.js").unwrap();
    assert_eq!(asset.encodings.len(), 1);
    assert_eq!(asset.version, 3);
}

#[test]
fn test_dapp_requires_a_proposal() {
    let (mut depot, _signer) = test_depot();
    let err = upload(
        &mut depot,
        &writer(),
        init_key(DAPP_COLLECTION, "/index.html", EncodingType::Identity),
        None,
        b"home",
        8,
        None,
    )
    .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    assert!(depot.uploads().batch_count() == 0);
}

#[test]
fn test_reserved_paths_fail_before_mutation() {
    let (mut depot, _signer) = test_depot();
    let root = depot.certificate().root;

    let domains = depot
        .init_asset_upload(&admin(), init_key(IMAGES, DOMAINS_PATH, EncodingType::Identity), None)
        .unwrap_err();
    assert!(matches!(domains, StoreError::ReservedAsset(_)));

    let origins = depot
        .init_asset_upload(
            &admin(),
            init_key(IMAGES, ALTERNATIVE_ORIGINS_PATH, EncodingType::Identity),
            None,
        )
        .unwrap_err();
    assert!(matches!(origins, StoreError::ReservedAsset(_)));

    let traversal = depot
        .init_asset_upload(&writer(), init_key(IMAGES, "/a/../b", EncodingType::Identity), None)
        .unwrap_err();
    assert!(matches!(traversal, StoreError::InvalidPath(_)));

    assert_eq!(depot.uploads().batch_count(), 0);
    assert_eq!(depot.certificate().root, root);
}

#[test]
fn test_anonymous_cannot_write_controller_collections() {
    let (mut depot, _signer) = test_depot();
    let err = depot
        .init_asset_upload(
            &Caller::anonymous(),
            init_key(IMAGES, "/x.png", EncodingType::Identity),
            None,
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permission);
}

#[test]
fn test_batches_belong_to_their_opener() {
    let (mut depot, _signer) = test_depot();
    let batch_id = depot
        .init_asset_upload(&writer(), init_key(IMAGES, "/x.png", EncodingType::Identity), None)
        .unwrap();
    let err = depot
        .upload_asset_chunk(
            &admin(),
            UploadChunk {
                batch_id,
                content: seeded_bytes(1, 16),
                order_id: 0,
            },
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::PermissionDenied(_)));
}

#[test]
fn test_chunk_size_is_capped() {
    let mut config = test_config();
    config.max_chunk_size = 8;
    let (mut depot, _signer) = depot_with(config);
    let ci = writer();
    let batch_id = depot
        .init_asset_upload(&ci, init_key(IMAGES, "/big.bin", EncodingType::Identity), None)
        .unwrap();
    let err = depot
        .upload_asset_chunk(
            &ci,
            UploadChunk {
                batch_id,
                content: seeded_bytes(2, 9),
                order_id: 0,
            },
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::ChunkTooLarge { size: 9, max: 8 }));
}

#[test]
fn test_delete_assets_keeps_reserved_files() {
    let (mut depot, _signer) = test_depot();
    let ci = writer();
    depot.set_custom_domain(&admin(), "example.com", None).unwrap();

    // The domains file lives in #dapp; clearing #dapp must keep it.
    assert_eq!(depot.del_assets(&ci, DAPP_COLLECTION).unwrap(), 0);
    assert!(depot.assets().get(DAPP_COLLECTION, DOMAINS_PATH).is_some());

    let err = depot
        .del_asset(&admin(), DAPP_COLLECTION, DOMAINS_PATH, None)
        .unwrap_err();
    assert!(matches!(err, StoreError::ReservedAsset(_)));

    depot.delete_custom_domain(&admin(), "example.com").unwrap();
    assert!(depot.assets().get(DAPP_COLLECTION, DOMAINS_PATH).is_none());
}

#[test]
fn test_clearing_a_private_collection_keeps_foreign_assets() {
    let (mut depot, _signer) = test_depot();
    depot
        .set_rule(
            &admin(),
            "notes",
            SetRule {
                read: Permission::Private,
                write: Permission::Private,
                max_size: None,
                proposal_required: false,
                version: None,
            },
        )
        .unwrap();
    let alice = Caller::controller("alice", larder_core::Scope::Write);
    let ci = writer();
    upload(&mut depot, &alice, init_key("notes", "/alice.txt", EncodingType::Identity), None, b"a", 8, None)
        .unwrap();
    upload(&mut depot, &ci, init_key("notes", "/ci.txt", EncodingType::Identity), None, b"c", 8, None)
        .unwrap();

    assert_eq!(depot.del_assets(&ci, "notes").unwrap(), 1);
    assert!(depot.assets().get("notes", "/ci.txt").is_none());
    assert!(depot.assets().get("notes", "/alice.txt").is_some());
}

#[test]
fn test_list_count_and_delete_many() {
    let (mut depot, _signer) = test_depot();
    let ci = writer();
    for path in ["/img/a.png", "/img/b.png", "/docs/c.txt"] {
        upload(&mut depot, &ci, init_key(IMAGES, path, EncodingType::Identity), None, path.as_bytes(), 64, None)
            .unwrap();
    }

    let images = ListParams {
        matcher: ListMatcher {
            key: Some("/img/*".to_string()),
            description: None,
        },
        ..ListParams::default()
    };
    let page = depot.list_assets(&Caller::anonymous(), IMAGES, &images).unwrap();
    assert_eq!(page.matches_length, 2);
    assert_eq!(page.items[0].key.full_path, "/img/a.png");
    assert_eq!(depot.count_assets(&ci, IMAGES, &ListParams::default()).unwrap(), 3);

    let err = depot
        .del_many_assets(&ci, IMAGES, &["/img/a.png".to_string(), "/missing".to_string()])
        .unwrap_err();
    assert!(matches!(err, StoreError::NoAssetFound { .. }));
    assert_eq!(depot.count_assets(&ci, IMAGES, &ListParams::default()).unwrap(), 3);

    assert_eq!(depot.del_filtered_assets(&ci, IMAGES, &images).unwrap(), 2);
    assert_eq!(
        depot
            .del_many_assets(&ci, IMAGES, &["/docs/c.txt".to_string()])
            .unwrap(),
        1
    );
    assert_eq!(depot.count_assets(&ci, IMAGES, &ListParams::default()).unwrap(), 0);
}

#[test]
fn test_del_asset_checks_version() {
    let (mut depot, _signer) = test_depot();
    let ci = writer();
    upload(&mut depot, &ci, init_key(IMAGES, "/a.png", EncodingType::Identity), None, b"a", 8, None).unwrap();

    let err = depot.del_asset(&ci, IMAGES, "/a.png", Some(7)).unwrap_err();
    assert!(matches!(err, StoreError::VersionMismatch { .. }));
    depot.del_asset(&ci, IMAGES, "/a.png", Some(1)).unwrap();
    assert_eq!(
        depot.http_request(&HttpRequest::get("/a.png")).status_code,
        404
    );
}

#[test]
fn test_private_collections_are_not_served() {
    let (mut depot, _signer) = test_depot();
    let ci = writer();
    depot
        .set_rule(
            &admin(),
            "drafts",
            SetRule {
                read: Permission::Managed,
                write: Permission::Controllers,
                max_size: Some(4),
                proposal_required: false,
                version: None,
            },
        )
        .unwrap();

    upload(&mut depot, &ci, init_key("drafts", "/draft.txt", EncodingType::Identity), None, b"wip", 8, None)
        .unwrap();
    assert_eq!(
        depot.http_request(&HttpRequest::get("/draft.txt")).status_code,
        404
    );
    assert!(depot.get_asset(&ci, "drafts", "/draft.txt").unwrap().is_some());
    assert!(depot.get_asset(&Caller::anonymous(), "drafts", "/draft.txt").unwrap().is_none());

    let too_big = upload(&mut depot, &ci, init_key("drafts", "/big.txt", EncodingType::Identity), None, b"12345", 8, None)
        .unwrap_err();
    assert!(matches!(too_big, StoreError::AssetTooLarge { size: 5, max: 4 }));
}

#[test]
fn test_rules_need_admin_and_matching_version() {
    let (mut depot, _signer) = test_depot();
    let rule = SetRule {
        read: Permission::Public,
        write: Permission::Managed,
        max_size: None,
        proposal_required: true,
        version: None,
    };
    assert!(matches!(
        depot.set_rule(&writer(), IMAGES, rule.clone()),
        Err(StoreError::PermissionDenied(_))
    ));
    assert!(matches!(
        depot.set_rule(&admin(), IMAGES, rule.clone()),
        Err(StoreError::VersionMismatch { .. })
    ));
    let current = depot.get_rule(IMAGES).unwrap().version;
    let updated = depot
        .set_rule(&admin(), IMAGES, SetRule { version: Some(current), ..rule })
        .unwrap();
    assert_eq!(updated.version, current + 1);
}

#[test]
fn test_stale_batches_are_purged() {
    let (mut depot, _signer) = test_depot();
    let ci = writer();
    let batch_id = depot
        .init_asset_upload(&ci, init_key(IMAGES, "/x.png", EncodingType::Identity), None)
        .unwrap();
    assert_eq!(depot.delete_stale_batches(OffsetDateTime::UNIX_EPOCH), 0);
    assert_eq!(
        depot.delete_stale_batches(OffsetDateTime::now_utc() + time::Duration::minutes(1)),
        1
    );

    let err = depot
        .commit_asset_upload(
            &ci,
            CommitBatch {
                batch_id,
                chunk_ids: Vec::new(),
                headers: Vec::new(),
                version: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::NoBatchFound(_)));
}

#[test]
fn test_every_served_response_verifies() {
    let (mut depot, signer) = test_depot();
    let ci = writer();
    let bodies = [
        ("/index.html", seeded_bytes(1, 100)),
        ("/docs/index.html", seeded_bytes(2, 300)),
        ("/404.html", seeded_bytes(3, 50)),
    ];
    for (path, body) in &bodies {
        upload(&mut depot, &ci, init_key(IMAGES, path, EncodingType::Identity), None, body, 64, None)
            .unwrap();
    }

    for (url, body) in [
        ("/", &bodies[0].1),
        ("/index.html", &bodies[0].1),
        ("/docs", &bodies[1].1),
        ("/docs/", &bodies[1].1),
        ("/nowhere", &bodies[2].1),
    ] {
        let response = depot.http_request(&HttpRequest::get(url));
        assert_eq!(response.body, *body, "{url}");
        verify_response(signer.public_key(), url, &response, body, 2).unwrap();
    }
}
