use std::time::{Duration, Instant};

use quarry::{
    builder::{Field, QuerySummary},
    chart::RenderOutcome,
    export::FileSink,
    present::PageAction,
    report::{self, ChartJs},
    ChartAdapter, Config, CsvDelivery, Delivery, FileExecutor, LoadError, ReportSession,
    RunStatus, TemplateLibrary,
};
use serde_json::json;

fn write_fixture(dir: &std::path::Path, name: &str, value: serde_json::Value) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
    path
}

#[tokio::test]
async fn template_run_from_fixtures_to_report() {
    let dir = tempfile::tempdir().unwrap();
    let accounts = write_fixture(
        dir.path(),
        "accounts.json",
        json!([
            {"Id": "001", "Name": "Acme", "Industry": "Technology", "AnnualRevenue": 5000000},
            {"Id": "002", "Name": "Globex", "Industry": "Energy", "AnnualRevenue": 1200000},
            {"Id": "003", "Name": "Initech", "Industry": "Technology", "AnnualRevenue": 800000}
        ]),
    );
    let opportunities = write_fixture(
        dir.path(),
        "opportunities.json",
        json!([
            {"Id": "006A", "Amount": 1000, "IsClosed": true, "IsWon": true, "AccountId": "001"},
            {"Id": "006B", "Amount": 2500, "IsClosed": false, "IsWon": false, "AccountId": "002"}
        ]),
    );

    let config = Config::default();
    let library = TemplateLibrary::builtin(&config).unwrap();
    let template = library.get("basic_sales_analysis").unwrap();
    let export_dir = dir.path().join("exports");
    let mut session = ReportSession::new(&config, ChartAdapter::load(ChartJs::load()).await)
        .with_delivery(CsvDelivery::new().with_save(Box::new(FileSink::new(&export_dir))));

    assert!(session.apply_template(template).unwrap().is_applied());
    assert!(session.builder().can_execute());

    let executor = FileExecutor::new(vec![accounts, opportunities]);
    let status = session.execute(&executor).await.unwrap();
    assert_eq!(status, RunStatus::Completed { total_records: 5 });

    let view = session.view().unwrap();
    let ids = view
        .sections()
        .iter()
        .map(|s| s.id.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(
        ids,
        vec![
            "section_salesSummary",
            "section_revenueByIndustry",
            "section_topAccounts",
            "section_insights"
        ]
    );
    assert!(session.charts().is_live("chart_section_revenueByIndustry"));

    let html = report::render_html(&template.name, view, session.charts()).unwrap();
    assert!(html.contains("<h1>Basic Sales Analysis</h1>"));
    assert!(html.contains("chart_section_revenueByIndustry"));

    let delivery = session.export_dashboard().unwrap();
    assert_eq!(
        delivery,
        Delivery::Saved(export_dir.join("dashboard-export.csv"))
    );
    let csv = std::fs::read_to_string(export_dir.join("dashboard-export.csv")).unwrap();
    assert!(csv.starts_with("\"Top Accounts\"\nName,Industry,AnnualRevenue\nAcme,Technology,5000000"));
}

#[tokio::test]
async fn charts_degrade_when_the_library_is_missing() {
    let config = Config::default();
    let mut session = ReportSession::new(
        &config,
        ChartAdapter::load(async {
            Err::<Box<dyn quarry::ChartLibrary>, _>(LoadError::ChartLibrary(
                "network unreachable".to_string(),
            ))
        })
        .await,
    );
    let builder = session.builder_mut();
    builder.change_query(0, "SELECT Id FROM Account").unwrap();
    builder.change_script(
        "function processData(a, b) { return { split: { A: 1, B: 2 }, rows: a }; }",
    );
    let executor = quarry::StaticExecutor::new(vec![json!([{"Id": "001"}])]);
    assert!(matches!(
        session.execute(&executor).await.unwrap(),
        RunStatus::Completed { .. }
    ));
    assert_eq!(session.charts().live_count(), 0);
    let view = session.view().unwrap();
    assert_eq!(view.sections().len(), 2);

    let mut adapter = ChartAdapter::unavailable(LoadError::ChartLibrary("offline".to_string()));
    let outcomes = adapter.render_all(view);
    assert!(matches!(outcomes[0].1, RenderOutcome::Unavailable(_)));

    let html = report::render_html("Degraded", view, session.charts()).unwrap();
    assert!(html.contains("Chart library unavailable"));
    assert!(html.contains("<table>"));
}

#[tokio::test]
async fn unparseable_fixture_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "[{\"Id\": ").unwrap();

    let mut session = ReportSession::new(
        &Config::default(),
        ChartAdapter::unavailable(LoadError::ChartLibrary("offline".to_string())),
    );
    session
        .builder_mut()
        .change_query(0, "SELECT Id FROM Account")
        .unwrap();
    session
        .builder_mut()
        .change_script("function processData(a, b) { return { n: a.length }; }");
    let status = session
        .execute(&FileExecutor::new(vec![broken]))
        .await
        .unwrap();
    assert!(matches!(status, RunStatus::Failed(_)));
    assert!(session.view().is_none());
}

#[test]
fn typing_in_one_field_does_not_delay_another() {
    let start = Instant::now();
    let ms = Duration::from_millis;
    let mut session = ReportSession::new(
        &Config::default(),
        ChartAdapter::unavailable(LoadError::ChartLibrary("offline".to_string())),
    );
    let builder = session.builder_mut();
    builder.input_query(0, "SELECT Id FROM Account LIMIT 5", start).unwrap();
    builder.input_script("function processData(a) {}", start + ms(300));
    builder
        .input_query(1, "UPDATE Contact", start + ms(400))
        .unwrap();

    assert_eq!(builder.poll(start + ms(500)), vec![Field::Query(0)]);
    assert_eq!(
        builder.summary(0).unwrap().text(),
        "Ready (~5 records)"
    );
    assert_eq!(
        builder.poll(start + ms(900)),
        vec![Field::Script, Field::Query(1)]
    );
    assert_eq!(builder.summary(1).unwrap(), QuerySummary::Error);
    assert!(builder.script_validation().has_errors);
}

#[tokio::test]
async fn tables_page_and_sort_over_all_rows() {
    let mut session = ReportSession::new(
        &Config::default(),
        ChartAdapter::unavailable(LoadError::ChartLibrary("offline".to_string())),
    );
    let builder = session.builder_mut();
    builder.change_query(0, "SELECT Id FROM Account").unwrap();
    builder.change_script("function processData(a, b) { return { rows: a }; }");
    let rows = (1..=12)
        .map(|i| json!({"Name": format!("Account {:02}", i), "Score": i}))
        .collect::<Vec<_>>();
    let executor = quarry::StaticExecutor::new(vec![json!(rows)]);
    session.execute(&executor).await.unwrap();

    let table = session
        .view_mut()
        .unwrap()
        .table_mut("section_rows")
        .unwrap();
    assert_eq!(table.total_pages(), 2);
    table.go_to(PageAction::Last);
    assert_eq!(table.page().len(), 2);
    table.sort_by("Score");
    table.sort_by("Score");
    assert_eq!(table.current_page(), 2);
    assert_eq!(table.page()[0].get("Score"), Some(&json!(2)));
    table.set_page_size(5);
    assert_eq!(table.current_page(), 1);
    assert_eq!(table.total_pages(), 3);
    assert_eq!(table.page()[0].get("Score"), Some(&json!(12)));
}
