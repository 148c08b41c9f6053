use atclean::adapters::lc_file::{parse_averaged_light_curve, parse_light_curve};
use atclean::app::pipelines::CleanOptions;
use atclean::domain::model::Filter;
use atclean::{AtCleanError, CleanPipeline, EtlEngine, LocalStorage, TomlConfig};
use std::fmt::Write;
use std::path::Path;
use tempfile::TempDir;

const TNSNAME: &str = "2020abc";
const NUM_CONTROLS: usize = 4;

/// 40 measurements over 10 days; row 5 has a huge uncertainty.
fn light_curve_text(control_index: usize) -> String {
    let mut text = String::from("###MJD m dm uJy duJy F err chi/N Obs\n");
    for i in 0..40 {
        let sign = if (i + control_index) % 2 == 0 { 1.0 } else { -1.0 };
        let dflux = if i == 5 { 500.0 } else { 10.0 };
        let _ = writeln!(
            text,
            "{:.5} 19.5 0.1 {} {} o 0 1.0 02a{}o{:02}",
            59000.0 + 0.25 * i as f64,
            sign * 5.0,
            dflux,
            59000 + i / 4,
            i
        );
    }
    text
}

fn write(root: &Path, relative: &str, text: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, text).unwrap();
}

fn setup(num_controls: usize) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write(root, "output/2020abc/2020abc.o.lc.txt", &light_curve_text(0));
    for i in 1..=num_controls {
        write(
            root,
            &format!("output/2020abc/controls/2020abc_i{:03}.o.lc.txt", i),
            &light_curve_text(i),
        );
    }
    write(
        root,
        "input/sninfo.txt",
        "tnsname ra dec mjd0\n2020abc 10.0 -5.0 59005.0\n",
    );
    temp_dir
}

fn config() -> TomlConfig {
    let mut config = TomlConfig::default();
    config.dir.atclean_input = "input".to_string();
    config.dir.output = "output".to_string();
    config
}

fn options(num_controls: usize) -> CleanOptions {
    CleanOptions {
        tnsnames: vec![TNSNAME.to_string()],
        filters: vec![Filter::Orange],
        num_controls,
        mjd0: None,
        overwrite: false,
    }
}

fn storage(temp_dir: &TempDir) -> LocalStorage {
    LocalStorage::new(temp_dir.path().to_string_lossy())
}

#[tokio::test]
async fn test_clean_writes_cleaned_averaged_and_readme() {
    let temp_dir = setup(NUM_CONTROLS);
    let root = temp_dir.path();

    let pipeline = CleanPipeline::new(storage(&temp_dir), config(), options(NUM_CONTROLS));
    let engine = EtlEngine::new_with_monitoring(pipeline, false);
    let output = engine.run().await.unwrap();
    assert_eq!(output, "output");

    // 清理後的 SN 光變曲線保留原始欄位並加上 Mask
    let path = "output/2020abc/2020abc.o.clean.lc.txt";
    let text = std::fs::read_to_string(root.join(path)).unwrap();
    let header = text.lines().next().unwrap();
    assert!(header.starts_with("MJD m dm uJy duJy F err chi/N Obs"));
    assert!(header.contains("Mask"));

    let cleaned = parse_light_curve(&text, 0, Filter::Orange, path).unwrap();
    assert_eq!(cleaned.len(), 40);
    assert!(cleaned.measurements[5].is_masked(0x2));
    assert!(!cleaned.measurements[6].is_masked(0x2));

    for i in 1..=NUM_CONTROLS {
        assert!(root
            .join(format!("output/2020abc/controls/2020abc_i{:03}.o.clean.lc.txt", i))
            .is_file());
        assert!(root
            .join(format!("output/2020abc/controls/2020abc_i{:03}.o.1.00days.lc.txt", i))
            .is_file());
    }

    let path = "output/2020abc/2020abc.o.1.00days.lc.txt";
    let text = std::fs::read_to_string(root.join(path)).unwrap();
    assert!(text.starts_with("MJD MJDbin uJy duJy stdev x2 Nclip Ngood Nexcluded Mask m dm"));
    let averaged = parse_averaged_light_curve(&text, 0, Filter::Orange, 1.0, path).unwrap();
    assert!(!averaged.is_empty());
    assert_eq!(averaged.bins[0].mjd_bin, 59000.5);

    let readme = std::fs::read_to_string(root.join("output/2020abc/README.md")).unwrap();
    assert!(readme.starts_with("# SN 2020abc Light Curve Cleaning and Averaging"));
    assert!(readme.contains("## FILTER: o"));
    assert!(readme.contains("### Uncertainty cut"));
    assert!(readme.contains("### Control light curve cut"));
    assert!(readme.contains("### Averaging light curves and bad day cut"));
}

#[tokio::test]
async fn test_clean_without_controls_skips_control_stages() {
    let temp_dir = setup(0);
    let root = temp_dir.path();

    let mut config = config();
    config.cuts.badday_cut.enabled = false;
    let pipeline = CleanPipeline::new(storage(&temp_dir), config, options(0));
    EtlEngine::new(pipeline).run().await.unwrap();

    assert!(root.join("output/2020abc/2020abc.o.clean.lc.txt").is_file());
    assert!(!root.join("output/2020abc/2020abc.o.1.00days.lc.txt").exists());

    let readme = std::fs::read_to_string(root.join("output/2020abc/README.md")).unwrap();
    assert!(!readme.contains("### Control light curve cut"));
    assert!(readme.contains("### Chi-square cut"));
}

#[tokio::test]
async fn test_existing_files_are_kept_without_overwrite() {
    let temp_dir = setup(0);
    let root = temp_dir.path();
    let cleaned = root.join("output/2020abc/2020abc.o.clean.lc.txt");
    write(root, "output/2020abc/2020abc.o.clean.lc.txt", "MJD uJy duJy\n");

    let mut config = config();
    config.cuts.badday_cut.enabled = false;
    let pipeline = CleanPipeline::new(storage(&temp_dir), config.clone(), options(0));
    EtlEngine::new(pipeline).run().await.unwrap();
    assert_eq!(std::fs::read_to_string(&cleaned).unwrap(), "MJD uJy duJy\n");

    let mut opts = options(0);
    opts.overwrite = true;
    let pipeline = CleanPipeline::new(storage(&temp_dir), config, opts);
    EtlEngine::new(pipeline).run().await.unwrap();
    assert!(std::fs::read_to_string(&cleaned).unwrap().contains("Mask"));
}

#[tokio::test]
async fn test_missing_control_light_curve_is_reported() {
    let temp_dir = setup(2);

    let pipeline = CleanPipeline::new(storage(&temp_dir), config(), options(3));
    let result = EtlEngine::new(pipeline).run().await;

    match result {
        Err(AtCleanError::ValidationError { message }) => {
            assert!(message.contains("2020abc_i003.o.lc.txt"));
        }
        other => panic!("expected a validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_dynamic_chi_square_cut_loads_controls() {
    let temp_dir = setup(2);
    let root = temp_dir.path();

    let mut config = config();
    config.cuts.uncert_est.enabled = false;
    config.cuts.controls_cut.enabled = false;
    config.cuts.badday_cut.enabled = false;

    let pipeline = CleanPipeline::new(storage(&temp_dir), config.clone(), options(2));
    EtlEngine::new(pipeline).run().await.unwrap();
    for i in 1..=2 {
        assert!(root
            .join(format!("output/2020abc/controls/2020abc_i{:03}.o.clean.lc.txt", i))
            .is_file());
    }

    // 缺少的控制光變曲線仍會被發現
    let pipeline = CleanPipeline::new(storage(&temp_dir), config.clone(), options(3));
    assert!(matches!(
        EtlEngine::new(pipeline).run().await,
        Err(AtCleanError::ValidationError { .. })
    ));

    // 使用 MJD0 之前的 SN 量測時不需要控制光變曲線
    config.cuts.x2_cut.use_pre_mjd0_lc = true;
    let pipeline = CleanPipeline::new(storage(&temp_dir), config, options(3));
    EtlEngine::new(pipeline).run().await.unwrap();
}

#[tokio::test]
async fn test_custom_cut_from_config_file() {
    let temp_dir = setup(2);
    let root = temp_dir.path();

    let config = TomlConfig::from_toml_str(
        r#"
[dir]
atclean_input = "input"
output = "output"

[[custom_cuts]]
name = "late"
column = "MJD"
max_value = 59005.0
flag = 0x4
"#,
    )
    .unwrap();
    let pipeline = CleanPipeline::new(storage(&temp_dir), config, options(2));
    EtlEngine::new(pipeline).run().await.unwrap();

    // MJD > 59005 的 19 筆量測被標記，SN 與控制光變曲線皆同
    let expected: Vec<usize> = (21..40).collect();
    let path = "output/2020abc/2020abc.o.clean.lc.txt";
    let text = std::fs::read_to_string(root.join(path)).unwrap();
    let cleaned = parse_light_curve(&text, 0, Filter::Orange, path).unwrap();
    assert_eq!(cleaned.ix_masked(0x4), expected);

    let path = "output/2020abc/controls/2020abc_i001.o.clean.lc.txt";
    let text = std::fs::read_to_string(root.join(path)).unwrap();
    let control = parse_light_curve(&text, 1, Filter::Orange, path).unwrap();
    assert_eq!(control.ix_masked(0x4), expected);

    let readme = std::fs::read_to_string(root.join("output/2020abc/README.md")).unwrap();
    assert!(readme.contains("- Custom cut 'late' on MJD: 0x4"));
    assert!(readme.contains("### Custom cut 'late'"));
    assert!(readme.contains("Total percent of data flagged by the cut on MJD (0x4): 47.50%"));
}
