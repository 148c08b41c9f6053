use atclean::adapters::lc_file::parse_table;
use atclean::app::pipelines::{DetectOptions, SimulationRequest, SimulationShape};
use atclean::core::rolling::Season;
use atclean::domain::model::Filter;
use atclean::{DetectPipeline, EtlEngine, LocalStorage, TomlConfig};
use std::fmt::Write;
use tempfile::TempDir;

/// 30 daily bins; the SN has a bump of 100 uJy around MJD 59015 and bin 3
/// is flagged as a bad day.
fn averaged_text(control_index: usize) -> String {
    let mut text = String::from("MJD MJDbin uJy duJy stdev x2 Nclip Ngood Nexcluded Mask m dm\n");
    for i in 0..30 {
        let mjd_bin = 59000.5 + i as f64;
        let flux = if control_index == 0 {
            100.0 * (-0.5 * ((mjd_bin - 59015.5) / 2.0).powi(2)).exp()
        } else if i % 2 == 0 {
            3.0
        } else {
            -3.0
        };
        let mask = if i == 3 { "0x00800000" } else { "0x00000000" };
        let _ = writeln!(
            text,
            "{} {} {} 10.0 1.0 1.0 0 4 0 {} NaN NaN",
            mjd_bin, mjd_bin, flux, mask
        );
    }
    text
}

fn setup(num_controls: usize) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::create_dir_all(root.join("output/2020abc/controls")).unwrap();
    std::fs::write(
        root.join("output/2020abc/2020abc.o.1.00days.lc.txt"),
        averaged_text(0),
    )
    .unwrap();
    for i in 1..=num_controls {
        std::fs::write(
            root.join(format!("output/2020abc/controls/2020abc_i{:03}.o.1.00days.lc.txt", i)),
            averaged_text(i),
        )
        .unwrap();
    }
    temp_dir
}

fn options(num_controls: usize) -> DetectOptions {
    DetectOptions {
        tnsname: "2020abc".to_string(),
        filter: Filter::Orange,
        num_controls,
        mjd_bin_size: 1.0,
        sigma_kern: 2.0,
        fom_limit: Some(5.0),
        simulation: None,
        skip_controls: Vec::new(),
        seasons: Vec::new(),
    }
}

fn config() -> TomlConfig {
    let mut config = TomlConfig::default();
    config.dir.output = "output".to_string();
    config
}

#[tokio::test]
async fn test_rolling_sum_peaks_at_the_bump() {
    let temp_dir = setup(2);
    let root = temp_dir.path();
    let storage = LocalStorage::new(root.to_string_lossy());

    let engine = EtlEngine::new(DetectPipeline::new(storage, config(), options(2)));
    let output = engine.run().await.unwrap();
    assert_eq!(output, "output/2020abc/2020abc.o.1.00days.snrsum.txt");

    let text = std::fs::read_to_string(root.join(&output)).unwrap();
    let table = parse_table(&text, &output).unwrap();
    assert_eq!(table.header, vec!["MJDbin", "SNR", "SNRsum", "SNRsumnorm"]);
    assert_eq!(table.rows.len(), 30);

    let snr_ix = table.column("SNR").unwrap();
    let sum_ix = table.column("SNRsumnorm").unwrap();
    // 壞日的 SNR 為 0
    assert_eq!(table.rows[3].1[snr_ix].parse::<f64>().unwrap(), 0.0);

    let peak = table
        .rows
        .iter()
        .max_by(|a, b| {
            let a: f64 = a.1[sum_ix].parse().unwrap();
            let b: f64 = b.1[sum_ix].parse().unwrap();
            a.total_cmp(&b)
        })
        .unwrap();
    assert_eq!(peak.1[0].parse::<f64>().unwrap(), 59015.5);

    let fom = std::fs::read_to_string(root.join("output/2020abc/2020abc.o.1.00days.fom.txt")).unwrap();
    let table = parse_table(&fom, "fom").unwrap();
    assert_eq!(table.header, vec!["control_index", "max_fom", "max_fom_mjd"]);
    assert_eq!(table.rows.len(), 3);
}

#[tokio::test]
async fn test_simulated_bump_is_detected() {
    let temp_dir = setup(1);
    let root = temp_dir.path();
    let storage = LocalStorage::new(root.to_string_lossy());

    let mut opts = options(1);
    opts.simulation = Some(SimulationRequest {
        peak_appmag: 17.0,
        peak_mjd: 59005.5,
        shape: SimulationShape::Gaussian { sigma_days: 2.0 },
    });
    let engine = EtlEngine::new(DetectPipeline::new(storage, config(), opts));
    let output = engine.run().await.unwrap();

    let text = std::fs::read_to_string(root.join(&output)).unwrap();
    assert!(text.starts_with("MJDbin SNR SNRsum SNRsumnorm SNRsim SNRsimsum\n"));

    let fom = std::fs::read_to_string(root.join("output/2020abc/2020abc.o.1.00days.fom.txt")).unwrap();
    let table = parse_table(&fom, "fom").unwrap();
    let detected_ix = table.column("detected").unwrap();
    assert!(table.rows.iter().all(|(_, row)| row[detected_ix] == "true"));
}

#[tokio::test]
async fn test_missing_averaged_light_curve() {
    let temp_dir = setup(0);
    let storage = LocalStorage::new(temp_dir.path().to_string_lossy());

    let engine = EtlEngine::new(DetectPipeline::new(storage, config(), options(1)));
    assert!(engine.run().await.is_err());
}

#[tokio::test]
async fn test_eruption_model_with_skipped_control() {
    let temp_dir = setup(3);
    let root = temp_dir.path();
    // 略過的 control 不會被讀取
    std::fs::remove_file(root.join("output/2020abc/controls/2020abc_i002.o.1.00days.lc.txt")).unwrap();
    std::fs::create_dir_all(root.join("models")).unwrap();
    std::fs::write(
        root.join("models/eruption.txt"),
        "# MJD m\n100.0 19.5\n101.5 18.0\n103.0 17.0\n104.5 18.0\n106.0 19.5\n",
    )
    .unwrap();
    let storage = LocalStorage::new(root.to_string_lossy());

    let mut opts = options(3);
    opts.skip_controls = vec![2];
    opts.seasons = vec![Season(59000.0, 59010.0)];
    opts.simulation = Some(SimulationRequest {
        peak_appmag: 17.0,
        peak_mjd: 59005.5,
        shape: SimulationShape::Eruption {
            path: "models/eruption.txt".to_string(),
        },
    });
    let engine = EtlEngine::new(DetectPipeline::new(storage, config(), opts));
    let output = engine.run().await.unwrap();

    let text = std::fs::read_to_string(root.join(&output)).unwrap();
    let table = parse_table(&text, &output).unwrap();
    let sim_ix = table.column("SNRsim").unwrap();
    let snr_ix = table.column("SNR").unwrap();
    let added = |row: usize| -> f64 {
        let sim: f64 = table.rows[row].1[sim_ix].parse().unwrap();
        let snr: f64 = table.rows[row].1[snr_ix].parse().unwrap();
        sim - snr
    };
    // MJD 59005.5 為峰值 (約 575 uJy)，模型範圍外不加任何 flux
    assert!((added(5) - 57.5).abs() < 0.1);
    assert_eq!(added(20), 0.0);

    let fom = std::fs::read_to_string(root.join("output/2020abc/2020abc.o.1.00days.fom.txt")).unwrap();
    let table = parse_table(&fom, "fom").unwrap();
    let indices: Vec<&str> = table.rows.iter().map(|(_, row)| row[0].as_str()).collect();
    assert_eq!(indices, vec!["0", "1", "3"]);
    let detected_ix = table.column("detected").unwrap();
    assert!(table.rows.iter().all(|(_, row)| row[detected_ix] == "true"));
}

#[tokio::test]
async fn test_missing_eruption_model() {
    let temp_dir = setup(0);
    let storage = LocalStorage::new(temp_dir.path().to_string_lossy());

    let mut opts = options(0);
    opts.simulation = Some(SimulationRequest {
        peak_appmag: 17.0,
        peak_mjd: 59005.5,
        shape: SimulationShape::Eruption {
            path: "models/missing.txt".to_string(),
        },
    });
    let engine = EtlEngine::new(DetectPipeline::new(storage, config(), opts));
    assert!(engine.run().await.is_err());
}
