//! Code-fix tasks: broken Python projects graded by patch + test rerun.
//!
//! Each sandbox gets a small pytest project under `project/` with a seeded
//! bug. The agent submits a unified diff; grading applies it to a fresh
//! copy of the fixture and reruns the suite, rewarding the fraction of
//! tests passing.

use std::sync::Arc;

use crate::config::HarnessConfig;
use crate::grading::{Grader, PatchGrader};
use crate::sandbox::{SandboxError, SandboxInstance};

use super::pick_variant;

pub(crate) const SLUGIFY_PROMPT: &str = "\
The project under project/ has a failing test suite: slugify() mishandles
hyphen runs at the borders of its output. Read the code, find the bug and
produce a unified diff that fixes it. Do not modify the tests.

Sandbox layout:
{layout_hint}

Submit a JSON envelope:
{\"passed\": bool, \"checks\": {}, \"answer\": {\"patch\": \"unified diff\"}, \"notes\": \"\"}
";

pub(crate) const DICT_MERGE_PROMPT: &str = "\
The project under project/ has a failing test suite: merge_dicts() is
supposed to merge nested dictionaries recursively but does not. Read the
code and the test data, then produce a unified diff that fixes the
implementation. Do not modify the tests.

Sandbox layout:
{layout_hint}

Submit a JSON envelope:
{\"passed\": bool, \"checks\": {}, \"answer\": {\"patch\": \"unified diff\"}, \"notes\": \"\"}
";

// --- slugify fixture -------------------------------------------------------

/// Broken implementation: collapses separator runs but never trims the
/// border hyphens, so "--release--" slugifies to "-release-".
const SLUGIFY_SOURCE: &str = r#"import re

TRANSLIT = {
    "ä": "ae", "ö": "oe", "ü": "ue", "ß": "ss",
    "é": "e", "è": "e", "ê": "e", "ë": "e",
    "ё": "yo",
}

def slugify(value: str) -> str:
    """Return a hyphen separated identifier for the given value."""

    if not isinstance(value, str):
        raise TypeError("value must be a string")

    text = value.lower()
    for char, repl in TRANSLIT.items():
        text = text.replace(char, repl)
    text = re.sub(r"[^a-z0-9]+", "-", text)
    return text
"#;

const SLUGIFY_TESTS: &str = r#"import json
import sys
from pathlib import Path

sys.path.insert(0, str(Path(__file__).resolve().parents[1]))
import pytest

from slugify import slugify

CASES_PATH = Path(__file__).resolve().parents[1] / "data" / "cases.json"


def load_cases():
    if not CASES_PATH.exists():
        raise RuntimeError("cases.json missing in sandbox")
    with CASES_PATH.open("r", encoding="utf-8") as fh:
        return json.load(fh)


def ids_from_case(case):
    return case["title"]


@pytest.mark.parametrize("case", load_cases(), ids=ids_from_case)
def test_slugify_expected_output(case):
    assert slugify(case["input"]) == case["expected"]


@pytest.mark.parametrize("value", [None, 123, []])
def test_slugify_rejects_non_string(value):
    with pytest.raises(TypeError):
        slugify(value)
"#;

fn slugify_cases() -> serde_json::Value {
    serde_json::json!([
        {"title": "collapse double hyphen", "input": "Config -- Reload", "expected": "config-reload"},
        {"title": "trim border hyphen", "input": "--release--", "expected": "release"},
        {"title": "german umlaut", "input": "Überraschung", "expected": "ueberraschung"},
        {"title": "mixed special chars", "input": "Café---Bar", "expected": "cafe-bar"},
        {"title": "complex trim", "input": "---Test---Case---", "expected": "test-case"},
    ])
}

// --- dict-merge fixture ----------------------------------------------------

/// Broken implementation: overwrites nested dictionaries wholesale instead
/// of merging them key by key.
const MERGE_SOURCE: &str = r#"from __future__ import annotations

from typing import Any, Dict


def merge_dicts(base: Dict[str, Any], patch: Dict[str, Any]) -> Dict[str, Any]:
    """Return a merged dictionary of base and patch."""

    if not isinstance(base, dict) or not isinstance(patch, dict):
        raise TypeError("Both base and patch must be dictionaries")

    result = dict(base)

    for key, value in patch.items():
        result[key] = value

    return result
"#;

const MERGE_TESTS: &str = r#"import json
from copy import deepcopy
from pathlib import Path

import pytest

from merge import merge_dicts

CASES_PATH = Path(__file__).parent / "data" / "cases.json"


def load_cases():
    with CASES_PATH.open("r", encoding="utf-8") as fh:
        return json.load(fh)


def make_id(case):
    return case["title"]


@pytest.mark.parametrize("case", load_cases(), ids=make_id)
def test_merge_behavior(case):
    base = case["base"]
    patch = case["patch"]
    expected = case["expected"]

    base_copy = deepcopy(base)
    result = merge_dicts(base, patch)

    assert result == expected
    assert base == base_copy, "Base dictionary must not be mutated"


def test_type_guard():
    with pytest.raises(TypeError):
        merge_dicts({}, [])
"#;

fn merge_cases(variant: u32) -> serde_json::Value {
    match variant {
        1 => serde_json::json!([
            {
                "title": "Deep merge with overrides",
                "base": {"app": {"host": "localhost", "port": 8000}},
                "patch": {"app": {"port": 9000, "debug": true}},
                "expected": {"app": {"host": "localhost", "port": 9000, "debug": true}},
            },
            {
                "title": "List replacement",
                "base": {"plugins": ["auth", "cache"]},
                "patch": {"plugins": ["auth", "metrics"]},
                "expected": {"plugins": ["auth", "metrics"]},
            },
        ]),
        2 => serde_json::json!([
            {
                "title": "Multiple branches",
                "base": {"app": {"cache": {"enabled": false}}, "version": 1},
                "patch": {"app": {"cache": {"enabled": true, "ttl": 30}}, "version": 2},
                "expected": {"app": {"cache": {"enabled": true, "ttl": 30}}, "version": 2},
            },
            {
                "title": "Insert nested dict",
                "base": {"services": {}},
                "patch": {"services": {"payment": {"url": "https://pay"}}},
                "expected": {"services": {"payment": {"url": "https://pay"}}},
            },
        ]),
        _ => serde_json::json!([
            {
                "title": "Preserve unrelated keys",
                "base": {"env": {"prod": {"region": "eu"}, "dev": {"region": "us"}}},
                "patch": {"env": {"prod": {"region": "us", "replicas": 3}}},
                "expected": {"env": {"prod": {"region": "us", "replicas": 3}, "dev": {"region": "us"}}},
            },
            {
                "title": "Replace primitive",
                "base": {"feature": {"enabled": false}},
                "patch": {"feature": {"enabled": true}},
                "expected": {"feature": {"enabled": true}},
            },
        ]),
    }
}

fn patch_grader(config: &HarnessConfig, fallback_total: u32) -> Arc<dyn Grader> {
    Arc::new(
        PatchGrader::new("project", config.test_command.clone(), fallback_total)
            .with_timeout(config.tool_timeout.max(std::time::Duration::from_secs(60))),
    )
}

/// Seeds the slugify project. Single fixture; cases do not vary.
pub(crate) fn build_slugify(
    sandbox: &SandboxInstance,
    _seed: u64,
    config: &HarnessConfig,
) -> Result<(Arc<dyn Grader>, u32), SandboxError> {
    sandbox.write_file("project/slugify.py", SLUGIFY_SOURCE)?;
    sandbox.write_file("project/tests/test_slugify.py", SLUGIFY_TESTS)?;
    let cases = serde_json::to_string_pretty(&slugify_cases())
        .map_err(|e| SandboxError::Setup(e.to_string()))?;
    sandbox.write_file("project/data/cases.json", &cases)?;

    // 5 case tests + 3 type-guard tests
    Ok((patch_grader(config, 8), 1))
}

/// Seeds one dict-merge variant with its JSON case file.
pub(crate) fn build_dict_merge(
    sandbox: &SandboxInstance,
    seed: u64,
    config: &HarnessConfig,
) -> Result<(Arc<dyn Grader>, u32), SandboxError> {
    let variant = pick_variant(seed, 3);

    sandbox.write_file("project/merge/merge.py", MERGE_SOURCE)?;
    sandbox.write_file("project/tests/test_merge.py", MERGE_TESTS)?;
    sandbox.write_file("project/conftest.py", "import sys\nfrom pathlib import Path\n\nsys.path.insert(0, str(Path(__file__).parent / \"merge\"))\n")?;
    let cases = serde_json::to_string_pretty(&merge_cases(variant))
        .map_err(|e| SandboxError::Setup(e.to_string()))?;
    sandbox.write_file("project/tests/data/cases.json", &cases)?;

    // 2 case tests + the type guard
    Ok((patch_grader(config, 3), variant))
}
