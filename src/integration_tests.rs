#[cfg(test)]
mod tests {
    use crate::commands::import::import_batch_internal;
    use crate::commands::metrics::{
        current_month_token, fetch_encours, insert_realisation, upsert_devis, upsert_encours,
        upsert_jours_ouverts, upsert_rendezvous, AppointmentFields, EncoursFields, HoursFields,
        MetricKind, QuoteFields, RealisationFields,
    };
    use crate::commands::kpi::{fetch_devis, fetch_realisation_totals};
    use crate::commands::patients::{
        adjust_monthly_patient_counters, create_patient_internal, delete_patient_internal,
        PatientPayload,
    };
    use crate::commands::recommend::{ADVICE_AVERAGE_BASKET, ADVICE_NEW_PATIENTS};
    use crate::commands::reports::{generate_report_internal, send_reports_internal};
    use crate::commands::settings::{get_or_create, update_settings_internal, UpdateSettingsRequest};
    use crate::db::{self, DbPool};
    use crate::report::mailer::testing::MockMailer;
    use crate::report::renderer::testing::FailingRenderer;

    async fn setup_test_db() -> DbPool {
        dotenvy::dotenv().ok();
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = db::init_pool(&database_url)
            .await
            .expect("Failed to create pool");
        db::init_database(&pool)
            .await
            .expect("Failed to run migrations");
        pool
    }

    async fn seed_practitioner(pool: &DbPool, code: &str, email: &str, name: &str) {
        let _ = sqlx::query("DELETE FROM accounts WHERE practitioner_code = $1 OR lower(email) = lower($2)")
            .bind(code)
            .bind(email)
            .execute(pool)
            .await;
        sqlx::query(
            "INSERT INTO accounts (email, password_hash, role, name, practitioner_code, cabinet_name)
             VALUES (lower($1), 'x', 'praticien', $2, $3, 'Cabinet Test')",
        )
        .bind(email)
        .bind(name)
        .bind(code)
        .execute(pool)
        .await
        .expect("Failed to seed practitioner");
    }

    async fn purge_metrics(pool: &DbPool, code: &str) {
        for table in ["realisations", "rendezvous", "jours_ouverts", "devis", "reports"] {
            let _ = sqlx::query(&format!("DELETE FROM {} WHERE practitioner = $1", table))
                .bind(code)
                .execute(pool)
                .await;
        }
    }

    #[tokio::test]
    async fn test_devis_upsert_overwrites() {
        let pool = setup_test_db().await;
        let code = "ZZ-DEVIS-01";
        purge_metrics(&pool, code).await;

        upsert_devis(
            &pool,
            code,
            "209901",
            &QuoteFields {
                quote_count: 10,
                proposed_amount: 5000.0,
                accepted_quote_count: 4,
                accepted_amount: 2000.0,
            },
        )
        .await
        .expect("first upsert failed");

        let second = upsert_devis(
            &pool,
            code,
            "209901",
            &QuoteFields {
                quote_count: 12,
                proposed_amount: 6200.0,
                accepted_quote_count: 7,
                accepted_amount: 3600.0,
            },
        )
        .await
        .expect("second upsert failed");

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM devis WHERE practitioner = $1 AND month = $2")
                .bind(code)
                .bind("209901")
                .fetch_one(&pool)
                .await
                .expect("count failed");
        assert_eq!(count, 1);
        assert_eq!(second.quote_count, 12);
        assert_eq!(second.accepted_quote_count, 7);

        purge_metrics(&pool, code).await;
    }

    /// Realisation keeps every imported row; readers see their sum.
    #[tokio::test]
    async fn test_realisation_rows_accumulate() {
        let pool = setup_test_db().await;
        let code = "ZZ-REAL-01";
        purge_metrics(&pool, code).await;

        for _ in 0..2 {
            insert_realisation(
                &pool,
                code,
                "20990201",
                &RealisationFields {
                    patient_count: 10,
                    billed_amount: 1000.0,
                    collected_amount: 800.0,
                },
            )
            .await
            .expect("insert failed");
        }

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM realisations WHERE practitioner = $1 AND left(month, 6) = '209902'",
        )
        .bind(code)
        .fetch_one(&pool)
        .await
        .expect("count failed");
        assert_eq!(count, 2);

        let totals = fetch_realisation_totals(&pool, code, "209902")
            .await
            .expect("totals failed");
        assert_eq!(totals.patient_count, 20);
        assert_eq!(totals.billed_amount, 2000.0);
        assert_eq!(totals.collected_amount, 1600.0);

        purge_metrics(&pool, code).await;
    }

    #[tokio::test]
    async fn test_encours_global_fallback() {
        let pool = setup_test_db().await;
        let code = "ZZ-ENC-01";
        let _ = sqlx::query("DELETE FROM encours WHERE practitioner IN ($1, 'GLOBAL')")
            .bind(code)
            .execute(&pool)
            .await;

        upsert_encours(
            &pool,
            None,
            &EncoursFields {
                remaining_minutes_to_bill: 600,
                remaining_amount_to_bill: 9000.0,
                hourly_profitability: 250.0,
                worked_days_profitability: 1800.0,
                patients_in_progress: 14,
            },
        )
        .await
        .expect("global upsert failed");

        let fallback = fetch_encours(&pool, code)
            .await
            .expect("fetch failed")
            .expect("expected the GLOBAL row");
        assert_eq!(fallback.practitioner, "GLOBAL");
        assert_eq!(fallback.patients_in_progress, 14);

        upsert_encours(
            &pool,
            Some(code),
            &EncoursFields {
                remaining_minutes_to_bill: 120,
                remaining_amount_to_bill: 2000.0,
                hourly_profitability: 300.0,
                worked_days_profitability: 2100.0,
                patients_in_progress: 3,
            },
        )
        .await
        .expect("specific upsert failed");

        let specific = fetch_encours(&pool, code)
            .await
            .expect("fetch failed")
            .expect("expected the practitioner row");
        assert_eq!(specific.practitioner, code);
        assert_eq!(specific.patients_in_progress, 3);

        let _ = sqlx::query("DELETE FROM encours WHERE practitioner IN ($1, 'GLOBAL')")
            .bind(code)
            .execute(&pool)
            .await;
    }

    #[tokio::test]
    async fn test_generate_report_end_to_end() {
        let pool = setup_test_db().await;
        let code = "ZZ-E2E-01";
        let email = "zz-e2e-01@test.local";
        seed_practitioner(&pool, code, email, "Durand").await;
        purge_metrics(&pool, code).await;

        insert_realisation(
            &pool,
            code,
            "20990501",
            &RealisationFields {
                patient_count: 40,
                billed_amount: 15000.0,
                collected_amount: 12000.0,
            },
        )
        .await
        .expect("seed realisation 1 failed");
        insert_realisation(
            &pool,
            code,
            "20990515",
            &RealisationFields {
                patient_count: 38,
                billed_amount: 13950.0,
                collected_amount: 11800.0,
            },
        )
        .await
        .expect("seed realisation 2 failed");
        upsert_rendezvous(
            &pool,
            code,
            "209905",
            &AppointmentFields {
                appointment_count: 90,
                total_duration_minutes: 4500,
                patient_count: 80,
                new_patient_count: 5,
            },
        )
        .await
        .expect("seed rendezvous failed");
        upsert_jours_ouverts(&pool, code, "209905", &HoursFields { minutes_open: 6930 })
            .await
            .expect("seed hours failed");

        let workdir = tempfile::tempdir().expect("tempdir failed");
        std::env::set_var("REPORTS_DIR", workdir.path());

        let generated = generate_report_internal(&pool, &FailingRenderer, code, "209905")
            .await
            .expect("generation failed");

        // 28950 / 78 and 28950 / 115.5h, rounded to cents.
        assert_eq!(generated.kpi.patient_count, 78);
        assert_eq!(generated.kpi.billed_amount, 28950.0);
        assert_eq!(generated.kpi.average_basket, 371.15);
        assert_eq!(generated.kpi.hourly_yield, 250.65);
        assert_eq!(generated.kpi.average_appointment_duration, 50.0);
        assert_eq!(generated.kpi.absences, 2);

        assert_eq!(
            generated.recommendations,
            vec![
                ADVICE_AVERAGE_BASKET.to_string(),
                ADVICE_NEW_PATIENTS.to_string(),
            ]
        );

        // Renderer is down, the html artifact is kept instead of a pdf.
        assert_eq!(generated.artifact_ext, "html");
        let html = String::from_utf8(generated.artifact.clone()).expect("artifact not utf-8");
        assert!(html.contains("371.15"));
        assert!(html.contains("250.65"));
        assert!(html.contains("Mai 2099"));
        assert!(html.contains("Durand"));
        // Acts table allocates 18 % of the 28950 CA to consultations.
        assert!(html.contains("5211.00"));

        assert_eq!(generated.history.len(), 1);
        assert_eq!(generated.history[0].month, "209905");
        assert_eq!(generated.history[0].appointment_count, 90);

        // Regeneration must not reset the delivery bookkeeping.
        sqlx::query("UPDATE reports SET email_sent = TRUE WHERE id = $1")
            .bind(generated.report_id)
            .execute(&pool)
            .await
            .expect("mark sent failed");
        let regenerated = generate_report_internal(&pool, &FailingRenderer, code, "209905")
            .await
            .expect("regeneration failed");
        assert_eq!(regenerated.report_id, generated.report_id);
        let still_sent: bool =
            sqlx::query_scalar("SELECT email_sent FROM reports WHERE id = $1")
                .bind(generated.report_id)
                .fetch_one(&pool)
                .await
                .expect("fetch email_sent failed");
        assert!(still_sent);

        purge_metrics(&pool, code).await;
        let _ = sqlx::query("DELETE FROM accounts WHERE practitioner_code = $1")
            .bind(code)
            .execute(&pool)
            .await;
    }

    #[tokio::test]
    async fn test_patient_counters_round_trip() {
        let pool = setup_test_db().await;
        let code = "ZZ-PAT-01";
        purge_metrics(&pool, code).await;
        let _ = sqlx::query("DELETE FROM patients WHERE practitioner = $1")
            .bind(code)
            .execute(&pool)
            .await;

        let payload = PatientPayload {
            practitioner_code: None,
            last_name: "Essai".to_string(),
            first_name: "Jean".to_string(),
            birth_date: None,
            phone: String::new(),
            email: String::new(),
            notes: String::new(),
            status: None,
            last_visit: None,
            next_visit: None,
            lifetime_billed: 0.0,
            visit_count: 0,
        };
        let patient = create_patient_internal(&pool, code, &payload)
            .await
            .expect("create failed");
        assert_eq!(patient.status, "nouveau");

        let month = current_month_token();
        let totals = fetch_realisation_totals(&pool, code, &month)
            .await
            .expect("totals failed");
        assert_eq!(totals.patient_count, 1);
        let (seen, fresh): (i32, i32) = sqlx::query_as(
            "SELECT patient_count, new_patient_count FROM rendezvous
             WHERE practitioner = $1 AND left(month, 6) = $2",
        )
        .bind(code)
        .bind(&month)
        .fetch_one(&pool)
        .await
        .expect("rendezvous counters missing");
        assert_eq!((seen, fresh), (1, 1));

        delete_patient_internal(&pool, &patient)
            .await
            .expect("delete failed");
        let totals = fetch_realisation_totals(&pool, code, &month)
            .await
            .expect("totals failed");
        assert_eq!(totals.patient_count, 0);

        // A second decrement on empty counters stays floored at zero.
        adjust_monthly_patient_counters(&pool, code, &month, -1)
            .await
            .expect("floored decrement failed");
        let totals = fetch_realisation_totals(&pool, code, &month)
            .await
            .expect("totals failed");
        assert_eq!(totals.patient_count, 0);
        let (seen, fresh): (i32, i32) = sqlx::query_as(
            "SELECT patient_count, new_patient_count FROM rendezvous
             WHERE practitioner = $1 AND left(month, 6) = $2",
        )
        .bind(code)
        .bind(&month)
        .fetch_one(&pool)
        .await
        .expect("rendezvous counters missing");
        assert_eq!((seen, fresh), (0, 0));

        purge_metrics(&pool, code).await;
    }

    #[tokio::test]
    async fn test_send_reports_skips_already_sent() {
        let pool = setup_test_db().await;
        let code = "ZZ-SEND-01";
        let email = "zz-send-01@test.local";
        seed_practitioner(&pool, code, email, "Martin").await;
        purge_metrics(&pool, code).await;

        let workdir = tempfile::tempdir().expect("tempdir failed");
        let artifact = workdir.path().join("rapport_test.html");
        std::fs::write(&artifact, "<html>rapport</html>").expect("artifact write failed");

        sqlx::query(
            "INSERT INTO reports (practitioner, month, artifact_path) VALUES ($1, '209906', $2)",
        )
        .bind(code)
        .bind(artifact.to_string_lossy().as_ref())
        .execute(&pool)
        .await
        .expect("seed report failed");

        let mailer = MockMailer::default();
        let first = send_reports_internal(&pool, &mailer, "209906", false)
            .await
            .expect("first send failed");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].status, "success");
        assert_eq!(mailer.sent.lock().unwrap().as_slice(), [email]);

        let (sent, recipient): (bool, Option<String>) = sqlx::query_as(
            "SELECT email_sent, recipient_email FROM reports WHERE practitioner = $1 AND month = '209906'",
        )
        .bind(code)
        .fetch_one(&pool)
        .await
        .expect("fetch report failed");
        assert!(sent);
        assert_eq!(recipient.as_deref(), Some(email));

        // Already delivered, nothing to do without force.
        let second = send_reports_internal(&pool, &mailer, "209906", false)
            .await
            .expect("second send failed");
        assert!(second.is_empty());
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);

        let forced = send_reports_internal(&pool, &mailer, "209906", true)
            .await
            .expect("forced send failed");
        assert_eq!(forced.len(), 1);
        assert_eq!(mailer.sent.lock().unwrap().len(), 2);

        purge_metrics(&pool, code).await;
        let _ = sqlx::query("DELETE FROM accounts WHERE practitioner_code = $1")
            .bind(code)
            .execute(&pool)
            .await;
    }

    #[tokio::test]
    async fn test_settings_singleton() {
        let pool = setup_test_db().await;

        let settings = get_or_create(&pool).await.expect("get_or_create failed");
        assert_eq!(settings.id, 1);

        let bad_hour = UpdateSettingsRequest {
            auto_generation: None,
            auto_email: None,
            cron_hour: Some(25),
            maintenance_mode: None,
            ai_models_enabled: None,
            import_enabled: None,
            dynamic_mode_expires_at: None,
            clear_dynamic_mode: false,
        };
        assert!(update_settings_internal(&pool, &bad_hour).await.is_err());

        let set_hour = UpdateSettingsRequest {
            auto_generation: None,
            auto_email: None,
            cron_hour: Some(7),
            maintenance_mode: None,
            ai_models_enabled: None,
            import_enabled: None,
            dynamic_mode_expires_at: None,
            clear_dynamic_mode: false,
        };
        let updated = update_settings_internal(&pool, &set_hour)
            .await
            .expect("update failed");
        assert_eq!(updated.cron_hour, 7);

        let restore = UpdateSettingsRequest {
            auto_generation: None,
            auto_email: None,
            cron_hour: Some(settings.cron_hour),
            maintenance_mode: None,
            ai_models_enabled: None,
            import_enabled: None,
            dynamic_mode_expires_at: None,
            clear_dynamic_mode: false,
        };
        let restored = update_settings_internal(&pool, &restore)
            .await
            .expect("restore failed");
        assert_eq!(restored.cron_hour, settings.cron_hour);
    }

    #[tokio::test]
    async fn test_upsert_buckets_both_token_widths() {
        let pool = setup_test_db().await;
        let code = "ZZ-WIDTH-01";
        purge_metrics(&pool, code).await;

        upsert_devis(
            &pool,
            code,
            "20990815",
            &QuoteFields {
                quote_count: 40,
                proposed_amount: 8000.0,
                accepted_quote_count: 10,
                accepted_amount: 2000.0,
            },
        )
        .await
        .expect("day token upsert failed");
        let second = upsert_devis(
            &pool,
            code,
            "209908",
            &QuoteFields {
                quote_count: 50,
                proposed_amount: 9000.0,
                accepted_quote_count: 20,
                accepted_amount: 4000.0,
            },
        )
        .await
        .expect("month token upsert failed");
        assert_eq!(second.quote_count, 50);

        // Both widths address the same logical month.
        let (count, stored_month): (i64, String) = sqlx::query_as(
            "SELECT COUNT(*), MIN(month) FROM devis WHERE practitioner = $1 AND left(month, 6) = '209908'",
        )
        .bind(code)
        .fetch_one(&pool)
        .await
        .expect("count failed");
        assert_eq!(count, 1);
        assert_eq!(stored_month, "209908");

        let read_back = fetch_devis(&pool, code, "20990820")
            .await
            .expect("fetch failed")
            .expect("devis row missing");
        assert_eq!(read_back.quote_count, 50);
        assert_eq!(read_back.proposed_amount, 9000.0);

        // Same rule on the appointment store.
        upsert_rendezvous(
            &pool,
            code,
            "20990801",
            &AppointmentFields {
                appointment_count: 10,
                total_duration_minutes: 500,
                patient_count: 9,
                new_patient_count: 2,
            },
        )
        .await
        .expect("day token rendezvous upsert failed");
        let rdv = upsert_rendezvous(
            &pool,
            code,
            "209908",
            &AppointmentFields {
                appointment_count: 12,
                total_duration_minutes: 600,
                patient_count: 11,
                new_patient_count: 3,
            },
        )
        .await
        .expect("month token rendezvous upsert failed");
        assert_eq!(rdv.appointment_count, 12);
        let rdv_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM rendezvous WHERE practitioner = $1")
                .bind(code)
                .fetch_one(&pool)
                .await
                .expect("rendezvous count failed");
        assert_eq!(rdv_count, 1);

        purge_metrics(&pool, code).await;
    }

    #[tokio::test]
    async fn test_import_batch_isolates_bad_rows() {
        let pool = setup_test_db().await;
        let code = "ZZ-IMP-01";
        purge_metrics(&pool, code).await;

        let rows = vec![
            serde_json::json!({
                "practitioner": code,
                "month": "209903",
                "quoteCount": 8,
                "proposedAmount": 4000.0,
                "acceptedQuoteCount": 5,
                "acceptedAmount": 2500.0
            }),
            // No month, the row is rejected without aborting the batch.
            serde_json::json!({ "practitioner": code, "quoteCount": 3 }),
            serde_json::json!({
                "practitioner": code,
                "month": "209904",
                "quoteCount": 6,
                "proposedAmount": 3000.0,
                "acceptedQuoteCount": 2,
                "acceptedAmount": 900.0
            }),
        ];

        let result = import_batch_internal(&pool, MetricKind::Devis, &rows)
            .await
            .expect("import failed");
        assert_eq!(result.imported_count, 2);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].row, 1);
        assert!(result.errors[0].error.contains("mois"));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM devis WHERE practitioner = $1")
            .bind(code)
            .fetch_one(&pool)
            .await
            .expect("count failed");
        assert_eq!(count, 2);

        purge_metrics(&pool, code).await;
    }

    #[tokio::test]
    async fn test_send_reports_isolates_failures() {
        let pool = setup_test_db().await;
        let ok_code = "ZZ-SND-OK";
        let ok_email = "zz-snd-ok@test.local";
        let down_code = "ZZ-SND-KO";
        seed_practitioner(&pool, ok_code, ok_email, "Bernard").await;
        seed_practitioner(&pool, down_code, "zz-snd-ko@test.local", "Moreau").await;
        purge_metrics(&pool, ok_code).await;
        purge_metrics(&pool, down_code).await;

        let workdir = tempfile::tempdir().expect("tempdir failed");
        let artifact = workdir.path().join("rapport_ok.html");
        std::fs::write(&artifact, "<html>rapport</html>").expect("artifact write failed");

        sqlx::query(
            "INSERT INTO reports (practitioner, month, artifact_path) VALUES ($1, '209907', $2)",
        )
        .bind(ok_code)
        .bind(artifact.to_string_lossy().as_ref())
        .execute(&pool)
        .await
        .expect("seed deliverable report failed");
        sqlx::query(
            "INSERT INTO reports (practitioner, month, artifact_path) VALUES ($1, '209907', $2)",
        )
        .bind(down_code)
        .bind(workdir.path().join("missing.html").to_string_lossy().as_ref())
        .execute(&pool)
        .await
        .expect("seed broken report failed");

        let mailer = MockMailer::default();
        let results = send_reports_internal(&pool, &mailer, "209907", false)
            .await
            .expect("send failed");
        assert_eq!(results.len(), 2);
        let ok_item = results
            .iter()
            .find(|item| item.practitioner == ok_code)
            .expect("deliverable item missing");
        let down_item = results
            .iter()
            .find(|item| item.practitioner == down_code)
            .expect("failed item missing");
        assert_eq!(ok_item.status, "success");
        assert_eq!(down_item.status, "error");
        assert!(down_item.error.is_some());
        assert_eq!(mailer.sent.lock().unwrap().as_slice(), [ok_email]);

        // Only the failed delivery is retried on the next run.
        let retry = send_reports_internal(&pool, &mailer, "209907", false)
            .await
            .expect("retry failed");
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].practitioner, down_code);
        assert_eq!(retry[0].status, "error");

        purge_metrics(&pool, ok_code).await;
        purge_metrics(&pool, down_code).await;
        let _ = sqlx::query("DELETE FROM accounts WHERE practitioner_code IN ($1, $2)")
            .bind(ok_code)
            .bind(down_code)
            .execute(&pool)
            .await;
    }
}
