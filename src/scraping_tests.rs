// src/scraping_tests.rs

#[cfg(test)]
mod tests {
    use crate::browser::{BrowserEvent, CapturedResponse};
    use crate::calendar::CalendarEntriesCollector;
    use crate::error::ErrorKind;
    use crate::prompts::ProgressController;
    use crate::scraping::*;
    use crate::testing::*;
    use chrono::{Datelike, Duration, NaiveDate, Weekday};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn entry(day: NaiveDate, title: &str, entry_type: &str, hours: f64) -> Value {
        json!({
            "widget": "calendarEntry",
            "date": { "value": { "V": format!("{}-08:00", day) } },
            "title": { "value": title },
            "type": { "instances": [ { "text": entry_type } ] },
            "quantity": { "value": hours },
        })
    }

    // Nov 15 is a vacation day, Nov 28 a paid holiday; everything else is regular work
    fn week_payload(monday: NaiveDate) -> Value {
        let mut items = Vec::new();
        for offset in 0..5 {
            let day = monday + Duration::days(offset);
            if day == date(2024, 11, 15) {
                items.push(json!({
                    "widget": "calendarEntry",
                    "date": { "value": { "V": day.to_string() } },
                    "title": { "value": "Annual Leave" },
                    "type": { "instances": [ { "text": "Time Off" } ] },
                    "subtitle1": { "value": "8 Hours" },
                }));
                items.push(entry(day, "Paid Time Off in Hours", "Time Tracking", 8.0));
            } else if day == date(2024, 11, 28) {
                items.push(entry(day, "Thanksgiving", "Holiday", 0.0));
                items.push(entry(day, "Paid Holiday", "Time Tracking", 8.0));
            } else {
                items.push(entry(day, "Regular", "Time Tracking", 8.0));
            }
        }
        items.push(json!({ "widget": "text", "value": "not an entry" }));
        json!({ "body": { "children": [ { "consolidatedList": { "children": items } } ] } })
    }

    fn november_weeks() -> Vec<FakeWeek> {
        let headings = [
            "Oct 21 - 27, 2024",
            "Oct 28 - Nov 3, 2024",
            "Nov 4 - 10, 2024",
            "Nov 11 - 17, 2024",
            "Nov 18 - 24, 2024",
            "Nov 25 - Dec 1, 2024",
            "Dec 2 - 8, 2024",
        ];
        let mut monday = date(2024, 10, 21);
        headings
            .iter()
            .map(|heading| {
                assert_eq!(monday.weekday(), Weekday::Mon);
                let week = FakeWeek {
                    heading: heading.to_string(),
                    payload: Some(week_payload(monday)),
                };
                monday += Duration::days(7);
                week
            })
            .collect()
    }

    fn calendar_browser(weeks: Vec<FakeWeek>, start_week: usize) -> FakeBrowser {
        let browser = FakeBrowser::new("https://wd5.myworkday.com/acme/d/home.htmld");
        add_calendar(&browser, weeks, start_week);
        browser
    }

    fn paid_titles() -> Vec<String> {
        vec!["Paid Holiday".to_string(), "Paid Time Off in Hours".to_string()]
    }

    // --- Navigation ---

    #[tokio::test(start_paused = true)]
    async fn time_page_selects_target_week() {
        let browser = calendar_browser(november_weeks(), 1);

        navigate_to_time_page(&browser, date(2024, 11, 1)).await.unwrap();

        let log = browser.log();
        let expected = [
            "click time",
            "click select-week",
            "click month",
            "press Control+a",
            "type 11",
            "click day",
            "press Control+a",
            "type 1",
            "click year",
            "press Control+a",
            "type 2024",
            "click ok",
        ];
        assert_eq!(log, expected.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        assert_eq!(
            get_current_week_range(&browser).await.unwrap(),
            (date(2024, 10, 28), date(2024, 11, 3))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn select_week_falls_back_to_button() {
        let browser = FakeBrowser::new("https://wd5.myworkday.com/acme/d/home.htmld");
        browser
            .add_element(FakeElement::new("select-week-btn", "button", "Select Week"))
            .add_element(FakeElement::new("month", "spinbutton", "Month"))
            .add_element(FakeElement::new("day", "spinbutton", "Day"))
            .add_element(FakeElement::new("year", "spinbutton", "Year"))
            .add_element(FakeElement::new("ok", "button", "OK"))
            .add_element(FakeElement::new("week-heading", "heading", "").level(2).hidden())
            .set_weeks(vec![FakeWeek {
                heading: "Dec 30, 2024 - Jan 5, 2025".into(),
                payload: None,
            }])
            .on_click("ok", vec![FakeAction::ShowWeek(0)]);

        select_week_via_modal(&browser, date(2025, 1, 2)).await.unwrap();

        assert!(browser.log().contains(&"click select-week-btn".to_string()));
        assert_eq!(
            get_current_week_range(&browser).await.unwrap(),
            (date(2024, 12, 30), date(2025, 1, 5))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_time_button_scrolls_then_fails() {
        let browser = FakeBrowser::new("https://wd5.myworkday.com/acme/d/home.htmld");
        browser.add_element(FakeElement::new("time", "button", "Time").hidden());

        let err = navigate_to_time_page(&browser, date(2024, 11, 1))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Navigation);
        assert!(err.to_string().starts_with("Time button not found"));
        assert!(browser
            .log()
            .iter()
            .any(|line| line.starts_with("evaluate window.scrollTo")));
    }

    #[tokio::test(start_paused = true)]
    async fn time_button_name_must_match_exactly() {
        let browser = FakeBrowser::new("https://wd5.myworkday.com/acme/d/home.htmld");
        browser.add_element(FakeElement::new("time-off", "button", "Time Off"));

        assert!(navigate_to_time_page(&browser, date(2024, 11, 1))
            .await
            .is_err());
        assert!(!browser.log().contains(&"click time-off".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn week_buttons_move_heading() {
        let browser = calendar_browser(november_weeks(), 1);
        browser.on_click("ok", vec![FakeAction::ShowWeek(3)]);
        navigate_to_time_page(&browser, date(2024, 11, 15)).await.unwrap();

        navigate_next_week(&browser).await.unwrap();
        assert_eq!(get_week_heading_text(&browser).await.unwrap(), "Nov 18 - 24, 2024");

        navigate_previous_week(&browser).await.unwrap();
        navigate_previous_week(&browser).await.unwrap();
        assert_eq!(
            get_current_week_range(&browser).await.unwrap(),
            (date(2024, 11, 4), date(2024, 11, 10))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_heading_only_warns() {
        let browser = calendar_browser(november_weeks(), 1);
        browser.on_click("ok", vec![FakeAction::ShowWeek(6)]);
        navigate_to_time_page(&browser, date(2024, 12, 2)).await.unwrap();

        // Already on the last scripted week, "Next Week" changes nothing
        navigate_next_week(&browser).await.unwrap();
        assert_eq!(get_week_heading_text(&browser).await.unwrap(), "Dec 2 - 8, 2024");
    }

    // --- Response Handler ---

    fn response(url: &str, status: u16, content_type: &str, body: &Value) -> BrowserEvent {
        let mut captured = CapturedResponse {
            url: url.to_string(),
            status,
            body: Some(body.to_string()),
            ..CapturedResponse::default()
        };
        captured
            .headers
            .insert("content-type".into(), content_type.into());
        BrowserEvent::Response(captured)
    }

    #[test]
    fn handler_only_accepts_calendar_json() {
        let collector = Arc::new(Mutex::new(CalendarEntriesCollector::new()));
        let handler = create_calendar_response_handler(Arc::clone(&collector));
        let payload = week_payload(date(2024, 11, 4));
        let api = format!("https://wd5.myworkday.com/acme{}", CALENDAR_ENTRIES_API_PATTERN);

        handler(&response("https://wd5.myworkday.com/acme/other.htmld", 200, "application/json", &payload));
        handler(&response(&api, 500, "application/json", &payload));
        handler(&response(&api, 200, "text/html", &payload));
        handler(&BrowserEvent::PageError("unrelated".into()));
        assert!(collector.lock().unwrap().is_empty());

        handler(&response(&api, 200, "application/json; charset=UTF-8", &payload));
        assert_eq!(collector.lock().unwrap().len(), 5);

        // Same week again adds nothing
        handler(&response(&api, 200, "application/json", &payload));
        assert_eq!(collector.lock().unwrap().len(), 5);
    }

    #[test]
    fn handler_survives_malformed_body() {
        let collector = Arc::new(Mutex::new(CalendarEntriesCollector::new()));
        let handler = create_calendar_response_handler(Arc::clone(&collector));
        let mut captured = CapturedResponse {
            url: format!("https://x{}", CALENDAR_ENTRIES_API_PATTERN),
            status: 200,
            body: Some("{not json".into()),
            ..CapturedResponse::default()
        };
        captured
            .headers
            .insert("content-type".into(), "application/json".into());

        handler(&BrowserEvent::Response(captured));
        assert!(collector.lock().unwrap().is_empty());
    }

    // --- Extraction ---

    #[tokio::test(start_paused = true)]
    async fn extracts_month_across_weeks() {
        let browser = calendar_browser(november_weeks(), 1);
        let progress = ProgressController::hidden();
        progress.create(20, "Connecting to Workday...");
        let (start, end) = (date(2024, 11, 1), date(2024, 11, 30));

        navigate_to_time_page(&browser, start).await.unwrap();
        let hours = extract_work_hours(&browser, start, end, &paid_titles(), &progress)
            .await
            .unwrap();

        assert_eq!(hours.working_days, 21);
        assert_eq!(hours.total_hours, 168.0);
        assert_eq!(hours.absence_days, 2);
        assert_eq!(hours.effective_days(), 19);
        assert!(hours
            .calendar_entries
            .iter()
            .all(|e| start <= e.entry_date && e.entry_date <= end));
        assert!(hours
            .calendar_entries
            .iter()
            .any(|e| e.entry_type == "Holiday" && e.entry_date == date(2024, 11, 28)));

        // Five weeks visited: Oct 28 through Nov 25
        assert_eq!(progress.position(), 5);
        assert_eq!(progress.message().as_deref(), Some("Processing week 5..."));
        // Listener is gone once extraction returns
        assert_eq!(browser.listener_count(), 0);
        let nexts = browser
            .log()
            .iter()
            .filter(|line| line.as_str() == "click next-week")
            .count();
        assert_eq!(nexts, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn paid_absence_titles_are_configurable() {
        let browser = calendar_browser(november_weeks(), 1);
        let progress = ProgressController::hidden();
        let (start, end) = (date(2024, 11, 1), date(2024, 11, 30));

        navigate_to_time_page(&browser, start).await.unwrap();
        let hours = extract_work_hours(&browser, start, end, &["Paid Holiday".to_string()], &progress)
            .await
            .unwrap();

        // Paid time off now counts as worked hours
        assert_eq!(hours.total_hours, 168.0);
        assert_eq!(hours.absence_days, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_navigation_is_an_error() {
        let mut weeks = november_weeks();
        weeks.truncate(4);
        let browser = calendar_browser(weeks, 1);
        let progress = ProgressController::hidden();
        let (start, end) = (date(2024, 11, 1), date(2024, 11, 30));

        navigate_to_time_page(&browser, start).await.unwrap();
        let err = extract_work_hours(&browser, start, end, &paid_titles(), &progress)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Navigation);
        assert!(err.to_string().contains("stalled at 2024-11-11"));
        assert_eq!(browser.listener_count(), 0);
    }
}
