//! Plan prompt — the fixed instruction template plus the user's context.

use crate::error::PlanError;

/// Instruction block sent with every request.
pub const INSTRUCTIONS: &str = "\
Составь подробный и конкретный план действий для выполнения следующего задания,
обязательно учитывая особенности комнаты, описанные в контексте.
Если комната имеет необычные или абстрактные характеристики, обязательно объясни,
как они влияют на каждый шаг плана.

**Требования к формату ответа:**
- Используй нумерованный список.
- Не используй форматирование Markdown.
- Каждый пункт списка должен быть на отдельной строке.
- Избегай дополнительных символов.";

/// The single worked example embedded in the template.
pub const EXAMPLE: &str = "\
**Пример:**
Контекст:
Комната с нулевой гравитацией, где все предметы парят в воздухе.
Задание: Зажечь свечу.

План действий:
1. Закрепить себя и свечу с помощью ремней, чтобы предотвратить дрейф в невесомости.
2. Использовать специальную зажигалку, предназначенную для условий невесомости.
3. Аккуратно зажечь свечу, следя за тем, чтобы пламя не распространялось бесконтрольно.
4. Наблюдать за свечой и быть готовым потушить ее в случае необходимости.";

const CONTEXT_HEADER: &str = "**Твой контекст:**";
const PLAN_HEADER: &str = "**План действий:**";

/// Join the room description and the task into the context block.
pub fn context_block(environment: &str, task: &str) -> String {
    format!("{environment}\nЗадание: {task}")
}

/// Render the full prompt for one request.
///
/// Both inputs must contain something other than whitespace. The output is
/// a pure function of the inputs.
pub fn build(environment: &str, task: &str) -> Result<String, PlanError> {
    if environment.trim().is_empty() {
        return Err(PlanError::InvalidInput {
            field: "environment description",
        });
    }
    if task.trim().is_empty() {
        return Err(PlanError::InvalidInput { field: "task" });
    }

    let context = context_block(environment, task);
    Ok(format!(
        "{INSTRUCTIONS}\n\n{EXAMPLE}\n\n{CONTEXT_HEADER}\n{context}\n\n{PLAN_HEADER}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_block_shape() {
        assert_eq!(
            context_block("Тёмный подвал", "Найти выход"),
            "Тёмный подвал\nЗадание: Найти выход"
        );
    }

    #[test]
    fn build_embeds_instructions_and_context() {
        let prompt = build("Комната с нулевой гравитацией", "Зажечь свечу").unwrap();
        assert!(prompt.contains(INSTRUCTIONS));
        assert!(prompt.contains(EXAMPLE));
        assert!(prompt.contains("Зажечь свечу"));
        assert!(prompt.contains("Комната с нулевой гравитацией\nЗадание: Зажечь свечу"));
        assert!(prompt.ends_with("**План действий:**"));
    }

    #[test]
    fn user_context_follows_the_example() {
        let prompt = build("Библиотека", "Найти книгу").unwrap();
        let example_at = prompt.find(EXAMPLE).unwrap();
        let context_at = prompt.find("Библиотека\nЗадание: Найти книгу").unwrap();
        assert!(example_at < context_at);
    }

    #[test]
    fn build_is_deterministic() {
        let a = build("Кухня", "Сварить кофе").unwrap();
        let b = build("Кухня", "Сварить кофе").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn braces_in_input_are_kept_verbatim() {
        let prompt = build("Комната {context}", "{task}").unwrap();
        assert!(prompt.contains("Комната {context}\nЗадание: {task}"));
    }

    #[test]
    fn blank_environment_rejected() {
        let err = build("  \n\t", "Зажечь свечу").unwrap_err();
        assert!(matches!(
            err,
            PlanError::InvalidInput {
                field: "environment description"
            }
        ));
    }

    #[test]
    fn empty_task_rejected() {
        let err = build("Кухня", "").unwrap_err();
        assert!(matches!(err, PlanError::InvalidInput { field: "task" }));
    }
}
