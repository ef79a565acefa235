mod mesh_test;
