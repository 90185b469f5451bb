use approx::assert_abs_diff_eq;
use rasch_rs::config::{BackendConfig, EngineConfig};
use rasch_rs::engine::RaschEngine;
use rasch_rs::matrix::StudentRecord;
use rasch_rs::simulation::{draw_abilities, simulate_responses};
use rasch_rs::utils::mean;

fn records(rows: &[Vec<i32>]) -> Vec<StudentRecord> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| StudentRecord::from_binary(format!("student-{i}"), row).unwrap())
        .collect()
}

fn scenario() -> Vec<StudentRecord> {
    records(&[vec![1, 1, 1, 1], vec![1, 0, 1, 0], vec![0, 0, 0, 0]])
}

fn internal_engine() -> RaschEngine {
    RaschEngine::from_config(EngineConfig::internal_only()).unwrap()
}

#[test]
fn three_student_scenario_end_to_end() {
    let result = internal_engine().estimate(&scenario()).unwrap();

    let theta: Vec<f64> = result.students.iter().map(|s| s.ability).collect();
    assert_eq!(theta[0], 3.0);
    assert_eq!(theta[2], -3.0);
    assert!(theta[1].is_finite() && theta[1].abs() < 3.0);
    assert_abs_diff_eq!(mean(&theta), 0.0, epsilon = 1e-9);
    assert_abs_diff_eq!(result.summary.mean_ability, 0.0, epsilon = 1e-9);

    let t: Vec<f64> = result.students.iter().map(|s| s.t_score).collect();
    assert!(t[0] > t[1] && t[1] > t[2]);
    assert_abs_diff_eq!(t[0], 62.247_448_7, epsilon = 1e-6);
    assert_abs_diff_eq!(t[1], 50.0, epsilon = 1e-9);
    assert_abs_diff_eq!(t[2], 37.752_551_3, epsilon = 1e-6);
    assert_abs_diff_eq!(result.summary.mean_t_score, 50.0, epsilon = 1e-9);

    let grades: Vec<&str> = result.students.iter().map(|s| s.grade.as_str()).collect();
    assert_eq!(grades, vec!["B+", "C+", "NC"]);

    assert_eq!(result.summary.n_students, 3);
    assert_eq!(result.summary.n_items, 4);
    assert_eq!(result.summary.item_difficulties.len(), 4);
}

#[test]
fn descriptive_grades_from_config() {
    let config = EngineConfig::from_toml_str(
        r#"
        grading = "descriptive"

        [backend]
        enabled = false
        "#,
    )
    .unwrap();
    let result = RaschEngine::from_config(config)
        .unwrap()
        .estimate(&scenario())
        .unwrap();
    let grades: Vec<&str> = result.students.iter().map(|s| s.grade.as_str()).collect();
    assert_eq!(grades, vec!["Yaxshi", "Qoniqarli", "Juda past"]);
}

#[test]
fn missing_r_installation_degrades_to_jmle() {
    let config = EngineConfig {
        backend: BackendConfig {
            enabled: true,
            rscript: "/nonexistent/bin/Rscript".into(),
            timeout_secs: 5,
        },
        ..EngineConfig::default()
    };
    let engine = RaschEngine::from_config(config).unwrap();
    assert!(!engine.has_external_backend());

    let with_probe = engine.estimate(&scenario()).unwrap();
    let internal = internal_engine().estimate(&scenario()).unwrap();
    assert_eq!(with_probe, internal);
}

#[test]
fn repeated_estimates_are_identical() {
    let theta = draw_abilities(60, 0.0, 1.2, 8);
    let beta = vec![-1.5, -1.0, -0.3, 0.0, 0.4, 0.9, 1.3, 2.0];
    let m = simulate_responses(&theta, &beta, 13).unwrap();
    let rows: Vec<Vec<i32>> = m.to_i32().rows().into_iter().map(|r| r.to_vec()).collect();
    let records = records(&rows);

    let engine = internal_engine();
    let first = engine.estimate(&records).unwrap();
    let second = engine.estimate(&records).unwrap();
    assert_eq!(first, second);
}

#[test]
fn t_scores_stay_in_range_and_boundaries_hold() {
    let beta = vec![-2.0, -1.0, 0.0, 1.0, 2.0];
    for seed in 0..5 {
        let theta = draw_abilities(40, 0.0, 2.5, seed);
        let m = simulate_responses(&theta, &beta, seed + 100).unwrap();
        let rows: Vec<Vec<i32>> = m.to_i32().rows().into_iter().map(|r| r.to_vec()).collect();
        let result = internal_engine().estimate(&records(&rows)).unwrap();

        for student in &result.students {
            assert!((0.0..=100.0).contains(&student.t_score));
            if student.correct_count == student.total {
                assert_eq!(student.ability, 3.0);
            }
            if student.correct_count == 0 {
                assert_eq!(student.ability, -3.0);
            }
        }
    }
}

#[test]
fn ranking_puts_the_strongest_student_first() {
    let result = internal_engine().estimate(&scenario()).unwrap();
    let ranked = result.ranked();
    assert_eq!(ranked[0].id, "student-0");
    assert_eq!(ranked[2].id, "student-2");
}
