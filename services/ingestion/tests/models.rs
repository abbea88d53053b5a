use propsearch_ingestion::models::IngestBatchRequest;

#[test]
fn batch_request_defaults_start_to_zero_and_limit_to_none() {
    let body = serde_json::json!({"listings": [{"zpid": "1"}, {"zpid": "2"}]});
    let req: IngestBatchRequest = serde_json::from_value(body).unwrap();
    assert_eq!(req.start, 0);
    assert_eq!(req.limit, None);
    assert_eq!(req.job_id, None);
    assert_eq!(req.listings.len(), 2);
}

#[test]
fn batch_request_reads_explicit_start_limit_and_job_id() {
    let body = serde_json::json!({
        "listings": [{"zpid": "1"}],
        "start": 50,
        "limit": 25,
        "job_id": "job-abc",
    });
    let req: IngestBatchRequest = serde_json::from_value(body).unwrap();
    assert_eq!(req.start, 50);
    assert_eq!(req.limit, Some(25));
    assert_eq!(req.job_id.as_deref(), Some("job-abc"));
}
