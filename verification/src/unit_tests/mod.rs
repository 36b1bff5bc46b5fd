mod fixup_tests;
mod verifier_tests;
