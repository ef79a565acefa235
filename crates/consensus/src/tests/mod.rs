mod quorum_test;
