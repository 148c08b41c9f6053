use atclean::adapters::atlas::AtlasTiming;
use atclean::adapters::lc_file::parse_light_curve;
use atclean::adapters::sninfo::SnInfoTable;
use atclean::app::pipelines::DownloadOptions;
use atclean::domain::model::Filter;
use atclean::{AtCleanError, DownloadPipeline, EtlEngine, LocalStorage, TomlConfig};
use httpmock::prelude::*;
use serde_json::json;
use tempfile::TempDir;

const ATLAS_RESULT: &str = "###MJD m dm uJy duJy F err chi/N RA Dec Obs\n\
59002.0 19.1 0.05 30.0 5.0 o 0 1.2 150.0 -5.0 02a59002o0100\n\
59001.0 19.3 0.06 25.0 5.0 c 0 0.9 150.0 -5.0 01a59001o0200\n\
59000.0 19.2 0.05 28.0 5.0 o 0 1.1 150.0 -5.0 02a59000o0100\n\
59003.0 19.2 0.05 28.0 0.0 o 0 1.1 150.0 -5.0 02a59003o0100\n";

fn fast_timing() -> AtlasTiming {
    AtlasTiming {
        queued_poll_seconds: 0,
        running_poll_seconds: 0,
        throttle_wait_seconds: 0,
        retry_delay_seconds: 0,
        max_retries: 0,
    }
}

fn config(server: &MockServer) -> TomlConfig {
    let mut config = TomlConfig::default();
    config.dir.atclean_input = "input".to_string();
    config.dir.output = "output".to_string();
    config.download.atlas_url = server.base_url();
    config.download.tns_url = server.base_url();
    config.download.timing = fast_timing();
    config.credentials.atlas_username = Some("user".to_string());
    config.credentials.atlas_password = Some("secret".to_string());
    config
}

async fn mock_atlas(server: &MockServer) -> httpmock::Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api-token-auth/");
            then.status(200).json_body(json!({"token": "abc"}));
        })
        .await;
    let queue = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/queue/")
                .header("Authorization", "Token abc");
            then.status(201)
                .json_body(json!({"url": server.url("/queue/1/")}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/queue/1/");
            then.status(200).json_body(json!({
                "starttimestamp": "2024-01-01T00:00:00Z",
                "finishtimestamp": "2024-01-01T00:01:00Z",
                "result_url": server.url("/result/1.txt"),
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/result/1.txt");
            then.status(200).body(ATLAS_RESULT);
        })
        .await;
    queue
}

fn options() -> DownloadOptions {
    DownloadOptions {
        tnsnames: vec!["2020abc".to_string()],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_download_with_tns_lookup_and_controls() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let server = MockServer::start_async().await;
    let queue = mock_atlas(&server).await;
    let tns = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/get/object")
                .body_contains("api_key=key");
            then.status(200).json_body(json!({
                "data": {"reply": {
                    "ra": "10:00:00.000",
                    "dec": "-05:00:00.00",
                    "discoverydate": "2020-01-21 00:00:00.000"
                }}
            }));
        })
        .await;

    let mut config = config(&server);
    config.download.num_controls = 2;
    config.credentials.tns_api_key = Some("key".to_string());
    config.credentials.tns_id = Some("1234".to_string());
    config.credentials.tns_bot_name = Some("bot".to_string());
    let mut opts = options();
    opts.controls = true;

    let storage = LocalStorage::new(root.to_string_lossy());
    let engine = EtlEngine::new(DownloadPipeline::new(storage, config, opts));
    assert_eq!(engine.run().await.unwrap(), "output");

    tns.assert_async().await;
    queue.assert_hits_async(3).await;

    // 依濾鏡分開、依 MJD 排序，並移除 duJy=0 的列
    let path = "output/2020abc/2020abc.o.lc.txt";
    let text = std::fs::read_to_string(root.join(path)).unwrap();
    assert!(text.starts_with("MJD m dm uJy duJy F err chi/N RA Dec Obs\n"));
    let orange = parse_light_curve(&text, 0, Filter::Orange, path).unwrap();
    assert_eq!(orange.mjds(), vec![59000.0, 59002.0]);

    let cyan = std::fs::read_to_string(root.join("output/2020abc/2020abc.c.lc.txt")).unwrap();
    assert_eq!(cyan.lines().count(), 2);

    for i in 1..=2 {
        for filter in ["o", "c"] {
            assert!(root
                .join(format!("output/2020abc/controls/2020abc_i{:03}.{}.lc.txt", i, filter))
                .is_file());
        }
    }
    let ctrl_coords =
        std::fs::read_to_string(root.join("output/2020abc/controls/2020abc.control_coords.txt"))
            .unwrap();
    assert_eq!(ctrl_coords.lines().count(), 4);

    let sninfo_text = std::fs::read_to_string(root.join("input/sninfo.txt")).unwrap();
    let sninfo = SnInfoTable::parse(&sninfo_text, "input/sninfo.txt").unwrap();
    let (coords, mjd0) = sninfo.get_info("2020abc").unwrap();
    let coords = coords.unwrap();
    assert!((coords.ra - 150.0).abs() < 1e-9);
    assert!((coords.dec + 5.0).abs() < 1e-9);
    assert!((mjd0.unwrap() - 58849.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_existing_files_are_not_downloaded_again() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::create_dir_all(root.join("input")).unwrap();
    std::fs::write(
        root.join("input/sninfo.txt"),
        "tnsname ra dec mjd0\n2020abc 150.0 -5.0 58849.0\n",
    )
    .unwrap();
    std::fs::create_dir_all(root.join("output/2020abc")).unwrap();
    for filter in ["o", "c"] {
        std::fs::write(
            root.join(format!("output/2020abc/2020abc.{}.lc.txt", filter)),
            "MJD uJy duJy\n",
        )
        .unwrap();
    }

    let server = MockServer::start_async().await;
    let queue = mock_atlas(&server).await;

    let storage = LocalStorage::new(root.to_string_lossy());
    let engine = EtlEngine::new(DownloadPipeline::new(storage, config(&server), options()));
    engine.run().await.unwrap();

    queue.assert_hits_async(0).await;
    assert_eq!(
        std::fs::read_to_string(root.join("output/2020abc/2020abc.o.lc.txt")).unwrap(),
        "MJD uJy duJy\n"
    );
}

#[tokio::test]
async fn test_unknown_coordinates_without_tns_fail() {
    let temp_dir = TempDir::new().unwrap();
    let server = MockServer::start_async().await;
    let queue = mock_atlas(&server).await;

    let mut opts = options();
    opts.tnsnames.push("2021xyz".to_string());
    let storage = LocalStorage::new(temp_dir.path().to_string_lossy());
    let engine = EtlEngine::new(DownloadPipeline::new(storage, config(&server), opts));

    assert!(matches!(
        engine.run().await,
        Err(AtCleanError::ProcessingError { .. })
    ));
    queue.assert_hits_async(0).await;
}

#[tokio::test]
async fn test_failed_sn_does_not_discard_finished_downloads() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::create_dir_all(root.join("input")).unwrap();
    std::fs::write(
        root.join("input/sninfo.txt"),
        "tnsname ra dec mjd0\n2020aaa 10.0 -5.0 58849.0\n2020bbb 20.0 -5.0 58900.0\n",
    )
    .unwrap();

    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api-token-auth/");
            then.status(200).json_body(json!({"token": "abc"}));
        })
        .await;
    let good_queue = server
        .mock_async(|when, then| {
            when.method(POST).path("/queue/").body_contains("ra=10&");
            then.status(201)
                .json_body(json!({"url": server.url("/queue/1/")}));
        })
        .await;
    let failing_queue = server
        .mock_async(|when, then| {
            when.method(POST).path("/queue/").body_contains("ra=20&");
            then.status(500).body("internal error");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/queue/1/");
            then.status(200).json_body(json!({
                "finishtimestamp": "2024-01-01T00:01:00Z",
                "result_url": server.url("/result/1.txt"),
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/result/1.txt");
            then.status(200).body(ATLAS_RESULT);
        })
        .await;

    let opts = DownloadOptions {
        tnsnames: vec!["2020aaa".to_string(), "2020bbb".to_string()],
        ..Default::default()
    };
    let storage = LocalStorage::new(root.to_string_lossy());
    let engine = EtlEngine::new(DownloadPipeline::new(storage, config(&server), opts));
    assert_eq!(engine.run().await.unwrap(), "output");

    good_queue.assert_async().await;
    failing_queue.assert_async().await;

    // 第一個 SN 的檔案已寫入，失敗的 SN 沒有任何檔案
    assert!(root.join("output/2020aaa/2020aaa.o.lc.txt").is_file());
    assert!(root.join("output/2020aaa/2020aaa.c.lc.txt").is_file());
    assert!(!root.join("output/2020bbb").exists());

    let sninfo_text = std::fs::read_to_string(root.join("input/sninfo.txt")).unwrap();
    let sninfo = SnInfoTable::parse(&sninfo_text, "input/sninfo.txt").unwrap();
    assert_eq!(sninfo.get_info("2020aaa").unwrap().1, Some(58849.0));
}

#[tokio::test]
async fn test_all_sne_failing_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::create_dir_all(root.join("input")).unwrap();
    std::fs::write(
        root.join("input/sninfo.txt"),
        "tnsname ra dec mjd0\n2020bbb 20.0 -5.0 58900.0\n",
    )
    .unwrap();

    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api-token-auth/");
            then.status(200).json_body(json!({"token": "abc"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/queue/");
            then.status(500).body("internal error");
        })
        .await;

    let opts = DownloadOptions {
        tnsnames: vec!["2020bbb".to_string()],
        ..Default::default()
    };
    let storage = LocalStorage::new(root.to_string_lossy());
    let engine = EtlEngine::new(DownloadPipeline::new(storage, config(&server), opts));
    assert!(matches!(
        engine.run().await,
        Err(AtCleanError::ProcessingError { .. })
    ));
}
