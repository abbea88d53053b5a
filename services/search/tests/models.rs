use propsearch_search::models::{parse_csv_set, SearchAfterCursor, SearchParams};

#[test]
fn search_params_deserializes_camel_case_query_string() {
    let qs = "query=white+house&minPrice=300000&maxPrice=700000&minBedrooms=3&propertyTypes=house,condo&limit=10";
    let params: SearchParams = serde_urlencoded::from_str(qs).unwrap();
    assert_eq!(params.query, "white house");
    assert_eq!(params.min_price, Some(300_000));
    assert_eq!(params.max_price, Some(700_000));
    assert_eq!(params.min_bedrooms, Some(3.0));
    assert_eq!(params.property_types.as_deref(), Some("house,condo"));
    assert_eq!(params.limit, Some(10));
}

#[test]
fn parse_csv_set_trims_and_drops_empty_entries() {
    let set = parse_csv_set(&Some(" house , condo,, townhouse ".to_string()));
    assert_eq!(set.len(), 3);
    assert!(set.contains("house"));
    assert!(set.contains("condo"));
    assert!(set.contains("townhouse"));
}

#[test]
fn parse_csv_set_of_none_is_empty() {
    assert!(parse_csv_set(&None).is_empty());
}

#[test]
fn search_after_cursor_round_trips_through_base64() {
    let cursor = SearchAfterCursor { sort_value: 1.2345, doc_id: "12345678".to_string() };
    let encoded = cursor.encode();
    let decoded = SearchAfterCursor::decode(&encoded).expect("cursor should decode");
    assert_eq!(decoded.doc_id, "12345678");
    assert!((decoded.sort_value - 1.2345).abs() < 1e-6);
}

#[test]
fn search_after_cursor_rejects_garbage_input() {
    assert!(SearchAfterCursor::decode("not valid base64 at all!!").is_none());
}
