//! End-to-end tests: CSV on disk through the genealogy model, traversal,
//! aggregation and segmentation lookups.

use std::io::Write;
use std::sync::Arc;

use lineage_scope::config::ViewerConfig;
use lineage_scope::genealogy::{GenealogyBuilder, GenealogyError, GenealogyModel};
use lineage_scope::metrics::AggregateCalculator;
use lineage_scope::segmentation::{DirSegmentationSource, SegmentationStore};
use lineage_scope::table::{HeaderMap, TableReader};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn write_csv(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

fn load(text: &str, headers: &HeaderMap) -> Result<GenealogyModel, GenealogyError> {
    let file = write_csv(text);
    let table = TableReader::read_csv(file.path()).unwrap();
    GenealogyBuilder::new().init(&table.rows, &table.columns, headers)
}

/// Two founders; `1` divides into `2` and `3`, and `3` into `4`.
const DIVISIONS: &str = "\
id,parent,time,frame,mass,x,y,label
1,,0,0,5.0,10,10,root
1,,1,1,6.0,11,10,root
2,1,2,2,3.1,12,8,left
3,1,2,2,3.2,12,14,right
3,1,3,3,3.4,13,15,right
4,3,4,4,1.9,14,16,leaf
9,-1,0,0,8.0,40,40,solo
9,-1,1,1,8.5,40,41,solo
";

// ---------------------------------------------------------------------------
// Model construction
// ---------------------------------------------------------------------------

#[test]
fn test_two_generation_scenario_from_csv() {
    let csv = "id,parent,time,mass\n1,,0,5\n1,,1,6\n2,1,2,7\n";
    let model = load(csv, &HeaderMap::default()).unwrap();

    assert_eq!(model.lineages().len(), 1);
    let lineage = model.lineage("1").unwrap();
    assert_eq!(lineage.cell_count, 3);
    assert_eq!(lineage.generations, 2);

    let t1 = model.track("1").unwrap();
    assert_eq!((t1.generation(), t1.len()), (0, 2));
    let t2 = model.track("2").unwrap();
    assert_eq!((t2.generation(), t2.len()), (1, 1));
    assert_eq!(t2.parent_id, "1");
}

#[test]
fn test_divisions_dataset() {
    let model = load(DIVISIONS, &HeaderMap::default()).unwrap();

    let ids: Vec<&str> = model.lineages().iter().map(|l| l.lineage_id.as_str()).collect();
    assert_eq!(ids, vec!["1", "9"]);

    let main = model.lineage("1").unwrap();
    assert_eq!(main.track_count, 4);
    assert_eq!(main.cell_count, 6);
    assert_eq!(main.generations, 3);
    assert_eq!(model.track("4").unwrap().generation(), 2);

    // Every cell lands in exactly one track.
    let total: usize = model.tracks().iter().map(|t| t.len()).sum();
    assert_eq!(total, model.cell_count());
    assert_eq!(model.cell_count(), 8);

    // Strings survive as string attributes; the parent column does not.
    let cell = &model.track("2").unwrap().cells[0];
    assert_eq!(cell.text("label"), Some("left"));
    assert_eq!(cell.num("mass"), Some(3.1));
    assert!(cell.num("id").is_none());
}

#[test]
fn test_traversal_and_relations() {
    let model = load(DIVISIONS, &HeaderMap::default()).unwrap();

    let order: Vec<&str> = model.lineage_tracks("1", None).map(|t| t.track_id.as_str()).collect();
    assert_eq!(order, vec!["1", "2", "3", "4"]);
    let again: Vec<&str> = model.lineage_tracks("1", None).map(|t| t.track_id.as_str()).collect();
    assert_eq!(order, again);

    let shallow: Vec<&str> = model.lineage_tracks("1", Some(1)).map(|t| t.track_id.as_str()).collect();
    assert_eq!(shallow, vec!["1", "2", "3"]);

    let rows: Vec<usize> = model.lineage_cells("1", None).map(|c| c.row_id).collect();
    assert_eq!(rows, vec![0, 1, 2, 3, 4, 5]);

    assert!(model.is_direct_relation("4", "1"));
    assert!(!model.is_direct_relation("4", "2"));
    assert!(!model.is_direct_relation("1", "9"));
    assert_eq!(model.lineage_id_of("4"), Some("1"));
}

#[test]
fn test_frames() {
    let model = load(DIVISIONS, &HeaderMap::default()).unwrap();

    assert_eq!(model.frame_list(), &[0, 1, 2, 3, 4]);
    let at2: Vec<&str> = model.cells_at_frame(2).map(|c| c.track_id.as_str()).collect();
    assert_eq!(at2, vec!["2", "3"]);
    assert_eq!(model.cells_at_frame(7).count(), 0);
    assert_eq!(model.cells_at_time(1.0).count(), 2);
    assert!(model.track_cell_at_frame("3", 3).is_some());
    assert!(model.track_cell_at_frame("3", 4).is_none());
}

#[test]
fn test_custom_headers() {
    let csv = "TrackID,Mother,t\na,,0\nb,a,1\n";
    let headers = HeaderMap {
        track_id: "TrackID".into(),
        parent_id: "Mother".into(),
        time: "t".into(),
        ..HeaderMap::default()
    };
    let model = load(csv, &headers).unwrap();
    assert_eq!(model.lineage("a").unwrap().track_count, 2);
    assert_eq!(model.track("b").unwrap().stats.min_time, Some(1.0));
}

#[test]
fn test_config_headers_and_sentinel() {
    let mut cfg = tempfile::NamedTempFile::new().unwrap();
    cfg.write_all(br#"{"headers": {"parent_id": "mother"}, "no_parent_sentinel": "0"}"#)
        .unwrap();
    let config = ViewerConfig::from_file(cfg.path()).unwrap();

    let file = write_csv("id,mother,time\n5,0,0\n6,5,1\n");
    let table = TableReader::read_csv(file.path()).unwrap();
    let model = GenealogyBuilder::new()
        .with_no_parent_sentinel(config.no_parent_sentinel.as_str())
        .init(&table.rows, &table.columns, &config.headers)
        .unwrap();

    assert_eq!(model.lineages().len(), 1);
    assert_eq!(model.lineage("5").unwrap().cell_count, 2);
}

// ---------------------------------------------------------------------------
// Structural failures
// ---------------------------------------------------------------------------

#[test]
fn test_missing_parent_fails_load() {
    let err = load("id,parent,time\n1,,0\n2,7,1\n", &HeaderMap::default()).unwrap_err();
    assert_eq!(
        err,
        GenealogyError::MissingParent {
            track_id: "2".into(),
            parent_id: "7".into()
        }
    );
}

#[test]
fn test_parent_cycle_fails_load() {
    let err = load("id,parent,time\n1,,0\na,b,0\nb,a,1\n", &HeaderMap::default()).unwrap_err();
    assert!(matches!(err, GenealogyError::ParentCycle { .. }));
}

#[test]
fn test_boolean_fields_dropped_not_fatal() {
    let model = load("id,parent,time,flag\n1,,0,true\n1,,1,7\n", &HeaderMap::default()).unwrap();
    let track = model.track("1").unwrap();
    assert!(track.cells[0].num("flag").is_none());
    assert!(track.cells[0].text("flag").is_none());
    assert_eq!(track.cells[1].num("flag"), Some(7.0));
}

// ---------------------------------------------------------------------------
// Consumers
// ---------------------------------------------------------------------------

#[test]
fn test_aggregate_over_csv() {
    let model = load(DIVISIONS, &HeaderMap::default()).unwrap();
    let series = AggregateCalculator::new()
        .lineage_series(&model, "1", Some("4"))
        .unwrap();

    let muted: Vec<&str> = series.tracks.iter().filter(|t| t.muted).map(|t| t.track_id.as_str()).collect();
    assert_eq!(muted, vec!["2"]);
    assert_eq!(series.value_range, Some((1.9, 6.0)));

    let means = AggregateCalculator::new().frame_means(&model);
    assert_eq!(means.len(), 5);
    assert_eq!(means[0].count, 2);
    assert!((means[0].mean - 6.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_frame_segmentations_from_directory() {
    let model = load(DIVISIONS, &HeaderMap::default()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("2-2.json"),
        r#"{"type": "Feature", "geometry": {"type": "Polygon", "coordinates": [[[10, 6], [14, 6], [14, 10], [10, 10], [10, 6]]]}, "properties": {"trackId": "2"}}"#,
    )
    .unwrap();

    let store = SegmentationStore::new(Arc::new(DirSegmentationSource::new(dir.path())), 64);
    let features = store.get_frame_segmentations(&model, 2).await.unwrap();
    assert_eq!(features.len(), 1);
    assert_eq!(features[0].bounds(), Some((10.0, 6.0, 14.0, 10.0)));

    let cell = &model.track("3").unwrap().cells[0];
    assert!(store.get_cell_segmentation(&model, cell).await.unwrap().is_none());
}
