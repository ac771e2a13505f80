use serde::{Deserialize, Serialize};

use crate::models::QuestionResult;

const QUIZ_WEIGHT: f64 = 60.0;
const VULN_BASE: f64 = 40.0;
const VULN_PENALTY: f64 = 5.0;

/// Session grade, bucketed from the final score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "Excelente")]
    Excelente,
    #[serde(rename = "Bueno")]
    Bueno,
    #[serde(rename = "Regular")]
    Regular,
    #[serde(rename = "Deficiente")]
    Deficiente,
    #[serde(rename = "Crítico")]
    Critico,
}

impl Grade {
    pub fn from_score(score: u32) -> Self {
        match score {
            90..=u32::MAX => Self::Excelente,
            75..=89 => Self::Bueno,
            60..=74 => Self::Regular,
            40..=59 => Self::Deficiente,
            _ => Self::Critico,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excelente => "Excelente",
            Self::Bueno => "Bueno",
            Self::Regular => "Regular",
            Self::Deficiente => "Deficiente",
            Self::Critico => "Crítico",
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final session score: 60% quiz performance, 40% scan hygiene (each finding
/// costs five points of the vulnerability part).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalScore {
    pub quiz_points: u32,
    pub total_quiz_points: u32,
    pub quiz_part: f64,
    pub vuln_part: f64,
    pub vulnerabilities_found: usize,
    pub final_score: u32,
    pub grade: Grade,
}

pub fn compute_score(results: &[QuestionResult], vulnerability_count: usize) -> FinalScore {
    let quiz_points: u32 = results.iter().map(|r| r.points_earned).sum();
    let total_quiz_points: u32 = results.iter().map(|r| r.prompt.points).sum();

    let quiz_part = if total_quiz_points == 0 {
        0.0
    } else {
        (f64::from(quiz_points) / f64::from(total_quiz_points)) * QUIZ_WEIGHT
    };
    let vuln_part = (VULN_BASE - VULN_PENALTY * vulnerability_count as f64).max(0.0);

    let final_score = (quiz_part + vuln_part).round().clamp(0.0, 100.0) as u32;

    FinalScore {
        quiz_points,
        total_quiz_points,
        quiz_part,
        vuln_part,
        vulnerabilities_found: vulnerability_count,
        final_score,
        grade: Grade::from_score(final_score),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuestionPrompt;

    fn result(points_earned: u32, points: u32) -> QuestionResult {
        QuestionResult {
            prompt: QuestionPrompt {
                question_id: "q".to_string(),
                phase_tag: "sqli".to_string(),
                text: String::new(),
                options: vec![],
                answer_ids: vec![],
                correct_index: 0,
                points,
            },
            user_answer: 0,
            correct: points_earned > 0,
            points_earned,
        }
    }

    #[test]
    fn test_perfect_quiz_no_vulnerabilities() {
        let results: Vec<QuestionResult> = (0..5).map(|_| result(10, 10)).collect();
        let score = compute_score(&results, 0);
        assert_eq!(score.quiz_part, 60.0);
        assert_eq!(score.vuln_part, 40.0);
        assert_eq!(score.final_score, 100);
        assert_eq!(score.grade, Grade::Excelente);
    }

    #[test]
    fn test_partial_quiz_three_findings() {
        // 38/50 on the quiz, three findings.
        let results = vec![result(10, 10), result(10, 10), result(10, 10), result(8, 10), result(0, 10)];
        let score = compute_score(&results, 3);
        assert!((score.quiz_part - 45.6).abs() < 1e-9);
        assert_eq!(score.vuln_part, 25.0);
        assert_eq!(score.final_score, 71);
        assert_eq!(score.grade, Grade::Regular);
    }

    #[test]
    fn test_poor_quiz_many_findings() {
        // 10/50 on the quiz, fifteen findings.
        let results = vec![result(10, 10), result(0, 10), result(0, 10), result(0, 10), result(0, 10)];
        let score = compute_score(&results, 15);
        assert_eq!(score.quiz_part, 12.0);
        assert_eq!(score.vuln_part, 0.0);
        assert_eq!(score.final_score, 12);
        assert_eq!(score.grade, Grade::Critico);
    }

    #[test]
    fn test_empty_quiz_scores_zero_quiz_part() {
        let score = compute_score(&[], 0);
        assert_eq!(score.quiz_part, 0.0);
        assert_eq!(score.final_score, 40);
        assert_eq!(score.grade, Grade::Deficiente);
    }

    #[test]
    fn test_grade_buckets() {
        assert_eq!(Grade::from_score(100), Grade::Excelente);
        assert_eq!(Grade::from_score(90), Grade::Excelente);
        assert_eq!(Grade::from_score(89), Grade::Bueno);
        assert_eq!(Grade::from_score(75), Grade::Bueno);
        assert_eq!(Grade::from_score(74), Grade::Regular);
        assert_eq!(Grade::from_score(60), Grade::Regular);
        assert_eq!(Grade::from_score(59), Grade::Deficiente);
        assert_eq!(Grade::from_score(40), Grade::Deficiente);
        assert_eq!(Grade::from_score(39), Grade::Critico);
        assert_eq!(Grade::from_score(0), Grade::Critico);
    }

    #[test]
    fn test_grade_spanish_serialization() {
        assert_eq!(serde_json::to_string(&Grade::Critico).unwrap(), "\"Crítico\"");
    }
}
