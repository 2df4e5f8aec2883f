//! Default prompt set for the HTTP collaborator.
//!
//! Each prompt spells out the marker layout the parser expects.

use super::FixRequest;

pub const SYSTEM_PROMPT: &str = "You are a careful programmer. Answer using exactly the section \
markers requested, each at the start of its own line, and put code in a fenced block.";

pub fn generation_prompt(task: &str) -> String {
    format!(
        "Write a complete, runnable program for the following task.\n\n\
         Task: {task}\n\n\
         Requirements:\n\
         1. Handle likely error cases.\n\
         2. Include brief comments.\n\
         3. In Python, store the final answer in a variable named `result`.\n\
         4. Prefer the standard library; list any third-party packages.\n\n\
         Respond with:\n\
         LANGUAGE: <language name>\n\
         DEPENDENCIES:\n<one package per line, or none>\n\
         CODE:\n```<language>\n<code>\n```\n\
         EXPLANATION:\n<how the code works>\n"
    )
}

pub fn fix_prompt(request: &FixRequest) -> String {
    format!(
        "The following {language} code failed while solving this task.\n\n\
         Task: {task}\n\n\
         Code:\n```{language}\n{code}\n```\n\n\
         Error:\n{fault}\n\n\
         Fix the code. Respond with:\n\
         ERROR_ANALYSIS:\n<what went wrong>\n\
         FIX_APPROACH:\n<what you changed>\n\
         FIXED_CODE:\n```{language}\n<the complete corrected program>\n```\n",
        language = request.language,
        task = request.task,
        code = request.code,
        fault = request.fault_text,
    )
}

pub fn input_synthesis_prompt(code: &str, language: &str) -> String {
    format!(
        "The following {language} program reads interactive input.\n\n\
         ```{language}\n{code}\n```\n\n\
         Provide test input so it can run unattended. Respond with:\n\
         INPUT_ANALYSIS:\n<what input the program expects>\n\
         TEST_DATA:\n<the exact text to feed on standard input>\n\
         EXECUTION_METHOD:\n<how the data is supplied>\n\
         MODIFIED_CODE:\n<optionally, a version with the input embedded; leave empty otherwise>\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompts_name_their_markers() {
        assert!(generation_prompt("sum 1..10").contains("DEPENDENCIES:"));
        let request = FixRequest {
            task: "t".to_string(),
            language: "python".to_string(),
            code: "1/0".to_string(),
            fault_text: "ZeroDivisionError".to_string(),
            attempt_index: 0,
        };
        let prompt = fix_prompt(&request);
        assert!(prompt.contains("FIXED_CODE:"));
        assert!(prompt.contains("```python\n1/0\n```"));
        assert!(input_synthesis_prompt("input()", "python").contains("TEST_DATA:"));
    }
}
